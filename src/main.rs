use std::str::FromStr;

fn main() {
    if handle_cli_flags() {
        return;
    }

    init_tracing();
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(err) = ezam_lens::run(args) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> bool {
    let mut saw_flag = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("ezam-lens {}", ezam_lens::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!("{}", ezam_lens::app::USAGE);
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}

fn init_tracing() {
    let env = std::env::var("EZAM_LENS_LOG").unwrap_or_else(|_| "info".into());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
