//! Notifier that writes status text to the log.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use leech_engine::Notifier;
use leech_protocol::{MessageRef, NotifyError};
use tracing::info;

/// Logs every status edit and, like a chat API, refuses an edit that would
/// not change the displayed text.
#[derive(Default)]
pub struct ConsoleNotifier {
    shown: Mutex<HashMap<MessageRef, String>>,
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn show(&self, target: MessageRef, text: String) -> Result<(), NotifyError> {
        let mut shown = self.shown.lock().unwrap_or_else(PoisonError::into_inner);
        if shown.get(&target) == Some(&text) {
            return Err(NotifyError::NotModified);
        }
        info!(status = %target, "\n{text}");
        shown.insert(target, text);
        Ok(())
    }

    /// Drops the remembered text of a finished status message.
    pub fn forget(&self, target: MessageRef) {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&target);
    }
}

impl Notifier for ConsoleNotifier {
    fn emit(
        &self,
        target: MessageRef,
        text: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        let result = self.show(target, text);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leech_protocol::ChatRef;

    fn msg(id: i64) -> MessageRef {
        MessageRef {
            chat: ChatRef(1),
            message_id: id,
        }
    }

    #[tokio::test]
    async fn identical_text_is_not_modified() {
        let n = ConsoleNotifier::new();
        n.emit(msg(1), "a".into()).await.unwrap();
        assert_eq!(n.emit(msg(1), "a".into()).await, Err(NotifyError::NotModified));
        n.emit(msg(1), "b".into()).await.unwrap();
        n.emit(msg(1), "a".into()).await.unwrap();
    }

    #[tokio::test]
    async fn messages_are_independent() {
        let n = ConsoleNotifier::new();
        n.emit(msg(1), "same".into()).await.unwrap();
        n.emit(msg(2), "same".into()).await.unwrap();
    }

    #[tokio::test]
    async fn forget_clears_history() {
        let n = ConsoleNotifier::new();
        n.emit(msg(1), "done".into()).await.unwrap();
        n.forget(msg(1));
        n.emit(msg(1), "done".into()).await.unwrap();
    }
}
