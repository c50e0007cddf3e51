use std::sync::Arc;
use std::thread;

use anyhow::Result;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::trust::{RejectReason, SenderInfo, TrustGate};

/// Message sent to the privileged side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Request {
    #[serde(rename = "openTab")]
    OpenTab { url: String, active: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RejectReason>,
}

impl Response {
    fn accepted() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn rejected(reason: RejectReason) -> Self {
        Self {
            ok: false,
            error: Some(reason),
        }
    }
}

pub struct Envelope {
    pub request: Request,
    pub sender: SenderInfo,
    pub reply: Sender<Response>,
}

/// Something that can actually put a page in front of the user.
pub trait TabLauncher: Send + Sync {
    fn launch(&self, url: &Url, active: bool) -> Result<()>;
}

/// Hands URLs to the desktop browser.
#[derive(Debug, Default)]
pub struct SystemBrowser;

impl TabLauncher for SystemBrowser {
    fn launch(&self, url: &Url, _active: bool) -> Result<()> {
        webbrowser::open(url.as_str())?;
        Ok(())
    }
}

/// The privileged side. Re-runs the full trust gate on every request before
/// touching the launcher.
pub struct Broker {
    requests: Sender<Envelope>,
    stop: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Broker {
    pub fn spawn(gate: TrustGate, launcher: Arc<dyn TabLauncher>) -> Self {
        let (req_tx, req_rx) = unbounded::<Envelope>();
        let (stop_tx, stop_rx) = unbounded::<()>();
        let handle = thread::spawn(move || serve(gate, launcher, req_rx, stop_rx));
        Self {
            requests: req_tx,
            stop: stop_tx,
            handle: Some(handle),
        }
    }

    pub fn channel(&self) -> Sender<Envelope> {
        self.requests.clone()
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(
    gate: TrustGate,
    launcher: Arc<dyn TabLauncher>,
    requests: Receiver<Envelope>,
    stop: Receiver<()>,
) {
    loop {
        select! {
            recv(requests) -> msg => {
                let Ok(envelope) = msg else { break };
                let response = handle_request(&gate, launcher.as_ref(), &envelope);
                let _ = envelope.reply.send(response);
            }
            recv(stop) -> _ => break,
        }
    }
    debug!("open broker stopped");
}

fn handle_request(gate: &TrustGate, launcher: &dyn TabLauncher, envelope: &Envelope) -> Response {
    let Request::OpenTab { url, active } = &envelope.request;
    let url = match gate.authorize(&envelope.sender, url) {
        Ok(url) => url,
        Err(reason) => {
            warn!(%reason, "privileged open refused");
            return Response::rejected(reason);
        }
    };
    match launcher.launch(&url, *active) {
        Ok(()) => Response::accepted(),
        Err(err) => {
            warn!(error = %err, %url, "launcher failed");
            Response::rejected(RejectReason::Transport)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenedVia {
    Privileged,
    SameContext,
}

/// Content-side half of the open path.
pub struct PrivilegedOpener {
    gate: TrustGate,
    identity: SenderInfo,
    channel: Option<Sender<Envelope>>,
    fallback: Arc<dyn TabLauncher>,
}

impl PrivilegedOpener {
    pub fn new(
        gate: TrustGate,
        identity: SenderInfo,
        channel: Option<Sender<Envelope>>,
        fallback: Arc<dyn TabLauncher>,
    ) -> Self {
        Self {
            gate,
            identity,
            channel,
            fallback,
        }
    }

    pub fn gate(&self) -> &TrustGate {
        &self.gate
    }

    /// One round trip over the privileged channel. Blocks until the broker
    /// answers or the channel breaks.
    pub fn request_open(&self, url: &Url, active: bool) -> Result<(), RejectReason> {
        self.gate.check_url(url.as_str())?;
        let channel = self.channel.as_ref().ok_or(RejectReason::Transport)?;
        let (reply_tx, reply_rx) = bounded(1);
        channel
            .send(Envelope {
                request: Request::OpenTab {
                    url: url.to_string(),
                    active,
                },
                sender: self.identity.clone(),
                reply: reply_tx,
            })
            .map_err(|_| RejectReason::Transport)?;
        let response = reply_rx.recv().map_err(|_| RejectReason::Transport)?;
        if response.ok {
            Ok(())
        } else {
            Err(response.error.unwrap_or(RejectReason::Transport))
        }
    }

    pub fn open_in_background(&self, url: &Url, active: bool) -> bool {
        match self.request_open(url, active) {
            Ok(()) => true,
            Err(reason) => {
                debug!(%reason, %url, "privileged open failed");
                false
            }
        }
    }

    /// Opens `url`, preferring the privileged path when `background` is set
    /// and falling back to the same-context launcher when that path fails.
    pub fn open(&self, url: &Url, background: bool, active: bool) -> Result<OpenedVia, RejectReason> {
        self.gate.check_url(url.as_str())?;
        if background && self.open_in_background(url, active) {
            return Ok(OpenedVia::Privileged);
        }
        self.fallback.launch(url, true).map_err(|err| {
            warn!(error = %err, %url, "same-context open failed");
            RejectReason::Transport
        })?;
        Ok(OpenedVia::SameContext)
    }
}
