use std::collections::BTreeMap;
use std::time::Duration;

use crate::ident::ItemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftState {
    /// Edited, no flush armed yet.
    Dirty,
    /// Flush armed for the given engine instant.
    Scheduled { due: Duration },
}

#[derive(Debug, Clone)]
struct Draft {
    text: String,
    state: DraftState,
}

/// Unsaved note edits, one per item. A draft leaves the map as soon as its
/// text is handed to the store.
#[derive(Debug)]
pub struct NoteDrafts {
    drafts: BTreeMap<ItemId, Draft>,
    debounce: Duration,
}

impl NoteDrafts {
    pub fn new(debounce: Duration) -> Self {
        Self {
            drafts: BTreeMap::new(),
            debounce,
        }
    }

    pub fn state(&self, id: &ItemId) -> Option<DraftState> {
        self.drafts.get(id).map(|draft| draft.state)
    }

    /// Unflushed text, which wins over the stored note when rendering.
    pub fn pending_text(&self, id: &ItemId) -> Option<&str> {
        self.drafts.get(id).map(|draft| draft.text.as_str())
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    pub fn input(&mut self, id: &ItemId, text: &str) {
        self.drafts.insert(
            id.clone(),
            Draft {
                text: text.to_string(),
                state: DraftState::Dirty,
            },
        );
    }

    /// Arms (or re-arms) the flush for a dirty or scheduled draft and returns
    /// its deadline.
    pub fn schedule(&mut self, id: &ItemId, now: Duration) -> Option<Duration> {
        let draft = self.drafts.get_mut(id)?;
        let due = now + self.debounce;
        draft.state = DraftState::Scheduled { due };
        Some(due)
    }

    /// Text to commit when the armed flush fires.
    pub fn take_due(&mut self, id: &ItemId, now: Duration) -> Option<String> {
        match self.drafts.get(id)?.state {
            DraftState::Scheduled { due } if due <= now => {
                self.drafts.remove(id).map(|draft| draft.text)
            }
            _ => None,
        }
    }

    /// Immediate flush, used on blur.
    pub fn flush(&mut self, id: &ItemId) -> Option<String> {
        self.drafts.remove(id).map(|draft| draft.text)
    }

    /// Everything not yet flushed, for teardown.
    pub fn drain_pending(&mut self) -> Vec<(ItemId, String)> {
        std::mem::take(&mut self.drafts)
            .into_iter()
            .map(|(id, draft)| (id, draft.text))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ItemId {
        ItemId::parse("ocds-1").unwrap()
    }

    #[test]
    fn dirty_scheduled_flushed() {
        let mut drafts = NoteDrafts::new(Duration::from_millis(200));
        drafts.input(&id(), "a");
        assert_eq!(drafts.state(&id()), Some(DraftState::Dirty));
        let due = drafts.schedule(&id(), Duration::from_millis(1000)).unwrap();
        assert_eq!(due, Duration::from_millis(1200));
        assert_eq!(drafts.take_due(&id(), Duration::from_millis(1100)), None);
        assert_eq!(drafts.take_due(&id(), due), Some("a".to_string()));
        assert_eq!(drafts.state(&id()), None);
        assert_eq!(drafts.flush(&id()), None);
        assert!(drafts.is_empty());
    }

    #[test]
    fn blur_flushes_immediately() {
        let mut drafts = NoteDrafts::new(Duration::from_millis(200));
        drafts.input(&id(), "draft");
        drafts.schedule(&id(), Duration::ZERO);
        assert_eq!(drafts.flush(&id()), Some("draft".to_string()));
        assert_eq!(drafts.take_due(&id(), Duration::from_secs(1)), None);
        assert!(drafts.is_empty());
    }

    #[test]
    fn flushed_drafts_do_not_accumulate() {
        let mut drafts = NoteDrafts::new(Duration::from_millis(200));
        for n in 0..50 {
            let id = ItemId::parse(&format!("ocds-{n}")).unwrap();
            drafts.input(&id, "text");
            let due = drafts.schedule(&id, Duration::from_millis(n)).unwrap();
            assert!(drafts.take_due(&id, due).is_some());
        }
        assert_eq!(drafts.len(), 0);

        let kept = ItemId::parse("ocds-kept").unwrap();
        drafts.input(&kept, "again");
        assert_eq!(drafts.pending_text(&kept), Some("again"));
        assert_eq!(drafts.len(), 1);
    }

    #[test]
    fn teardown_returns_unflushed_only() {
        let mut drafts = NoteDrafts::new(Duration::from_millis(200));
        let other = ItemId::parse("ocds-2").unwrap();
        drafts.input(&id(), "keep");
        drafts.input(&other, "done");
        drafts.flush(&other);
        assert_eq!(drafts.drain_pending(), vec![(id(), "keep".to_string())]);
        assert_eq!(drafts.state(&id()), None);
    }
}
