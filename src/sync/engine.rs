use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use super::listener::{ListenerRegistry, SubscriptionId, SyncListener};
use super::message::{MessageType, PatchMessage};
use crate::document::{ClientDocument, DocumentState, Shadow};
use crate::error::{Result, SyncError};
use crate::storage::{DocumentEntry, DocumentStore};
use crate::synchronizer::Synchronizer;
use crate::transport::{ConnectionState, InboundHandler, PatchSender};

/// What `receive_patch` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied { version: u64 },
    Detached,
    Ignored,
}

type Entry<S> = DocumentEntry<<S as Synchronizer>::Content, <S as Synchronizer>::Diff>;

/// Orchestrates the store and the synchronizer for every tracked document.
///
/// All operations are synchronous. Work on one document runs under that
/// document's lock; listeners are only called after the lock is released.
pub struct SyncEngine<S: Synchronizer> {
    synchronizer: S,
    store: DocumentStore<S::Content, S::Diff>,
    listeners: ListenerRegistry<S::Content>,
    sender: Arc<dyn PatchSender<S::Diff>>,
}

impl<S: Synchronizer> SyncEngine<S> {
    pub fn new(synchronizer: S, sender: Arc<dyn PatchSender<S::Diff>>) -> Self {
        Self {
            synchronizer,
            store: DocumentStore::new(),
            listeners: ListenerRegistry::new(),
            sender,
        }
    }

    pub fn synchronizer(&self) -> &S {
        &self.synchronizer
    }

    /// Start tracking `document`. Announced to the server right away when connected,
    /// otherwise on the next connect.
    pub fn add_document(&self, document: ClientDocument<S::Content>) -> Result<()> {
        let id = document.id.clone();
        // announce before the entry lock is released so no PATCH can overtake the ADD
        self.store.put_with(document, |entry| self.announce(entry))?;
        debug!(document = %id, format = self.synchronizer.format(), "document registered");
        Ok(())
    }

    /// Record `document`'s current content and ship the edit from the shadow.
    ///
    /// Returns the new shadow version. When offline the edit stays queued and is
    /// flushed by the next connect.
    pub fn diff_and_send(&self, document: &ClientDocument<S::Content>) -> Result<u64> {
        let handle = self
            .store
            .entry(&document.id)
            .map_err(|_| SyncError::NotRegistered(document.id.clone()))?;
        let mut entry = handle.lock();

        entry.document.content = document.content.clone();
        let edit = self.synchronizer.diff(&entry.document, &entry.shadow);
        let shadow = self
            .synchronizer
            .patch_shadow(&entry.shadow, entry.document.content.clone());
        entry.save_shadow(shadow)?;
        entry.pending.push_back(edit);
        if entry.state == DocumentState::Clean {
            transition(&mut *entry, DocumentState::PendingSend);
        }

        let version = entry.shadow.version;
        debug!(document = %document.id, version, "edit recorded");
        self.flush(&mut entry)?;
        Ok(version)
    }

    /// Handle one message from the server.
    pub fn receive_patch(&self, message: PatchMessage<S::Diff>) -> Result<PatchOutcome> {
        match message.msg_type {
            MessageType::Patch => self.apply_patch(message),
            MessageType::Add => {
                warn!(document = %message.id, "server sent ADD, ignoring");
                Ok(PatchOutcome::Ignored)
            }
            MessageType::Detach => self.detach(message),
            MessageType::Unknown => {
                debug!(document = %message.id, "ignoring message of unknown type");
                Ok(PatchOutcome::Ignored)
            }
        }
    }

    fn apply_patch(&self, message: PatchMessage<S::Diff>) -> Result<PatchOutcome> {
        let handle = self.store.entry(&message.id).map_err(|_| {
            warn!(document = %message.id, "patch for unregistered document");
            SyncError::NotRegistered(message.id.clone())
        })?;

        let (updated, version) = {
            let mut entry = handle.lock();
            check_addressee(&*entry, &message)?;
            if message.edits.is_empty() {
                debug!(document = %message.id, "patch without edits");
                return Ok(PatchOutcome::Ignored);
            }

            // Offline edits keep the document in PendingSend until they are flushed
            let resting = entry.state;
            if resting == DocumentState::Clean {
                transition(&mut *entry, DocumentState::ApplyingPatch);
            }

            let applied = self
                .apply_edits(&entry.shadow, &message)
                .and_then(|shadow| entry.save_shadow(shadow));
            if resting == DocumentState::Clean {
                transition(&mut *entry, DocumentState::Clean);
            }
            if let Err(err) = applied {
                warn!(document = %message.id, "discarding patch: {err}");
                return Err(err);
            }

            entry.document.content = entry.shadow.content.clone();
            debug!(document = %message.id, version = entry.shadow.version, "patch applied");
            (entry.document.clone(), entry.shadow.version)
        };

        self.listeners.notify_patch(&updated);
        Ok(PatchOutcome::Applied { version })
    }

    fn detach(&self, message: PatchMessage<S::Diff>) -> Result<PatchOutcome> {
        let Ok(handle) = self.store.entry(&message.id) else {
            debug!(document = %message.id, "detach for untracked document");
            return Ok(PatchOutcome::Ignored);
        };
        check_addressee(&*handle.lock(), &message)?;

        self.store.remove(&message.id);
        info!(document = %message.id, "document detached");
        Ok(PatchOutcome::Detached)
    }

    /// Apply every edit to a scratch copy of `shadow`. Nothing is kept on failure.
    fn apply_edits(
        &self,
        shadow: &Shadow<S::Content>,
        message: &PatchMessage<S::Diff>,
    ) -> Result<Shadow<S::Content>> {
        let mut scratch = shadow.clone();
        for edit in &message.edits {
            let content = self.synchronizer.apply_edit(&scratch, edit)?;
            scratch = self.synchronizer.patch_shadow(&scratch, content);
        }
        Ok(scratch)
    }

    /// Re-announce every document and flush queued edits. Runs on every connect.
    pub fn resync_all(&self) {
        for id in self.store.ids() {
            let Ok(handle) = self.store.entry(&id) else {
                continue;
            };
            let mut entry = handle.lock();
            self.announce(&mut entry);
            if let Err(err) = self.flush(&mut entry) {
                warn!(document = %id, "flushing queued edits failed: {err}");
            }
        }
    }

    /// Send ADD unless the live connection already heard about this document.
    fn announce(&self, entry: &mut Entry<S>) {
        let Some(connection) = self.sender.connection() else {
            return;
        };
        if entry.announced_on == Some(connection) {
            return;
        }
        let document = &entry.document;
        match self
            .sender
            .send(&PatchMessage::add(document.id.as_str(), document.client_id.as_str()))
        {
            Ok(()) => {
                debug!(document = %document.id, connection, "announced");
                entry.announced_on = Some(connection);
            }
            Err(err) => debug!(document = %document.id, "announce skipped: {err}"),
        }
    }

    /// Hand every queued edit to the sender. Offline is not an error; the edits wait.
    fn flush(&self, entry: &mut Entry<S>) -> Result<()> {
        if !entry.has_queued_edits() {
            return Ok(());
        }
        if !self.sender.is_connected() {
            debug!(document = %entry.document.id, queued = entry.pending.len(), "offline, edits queued");
            return Ok(());
        }
        self.announce(entry);

        let message = PatchMessage::patch(
            entry.document.id.clone(),
            entry.document.client_id.clone(),
            entry.pending.iter().cloned().collect(),
        );
        match self.sender.send(&message) {
            Ok(()) => {
                transition(entry, DocumentState::AwaitingAck);
                // Transports never acknowledge, so the hand-off counts as the ack
                entry.pending.clear();
                transition(entry, DocumentState::Clean);
                debug!(document = %entry.document.id, edits = message.edits.len(), "patch sent");
                Ok(())
            }
            Err(SyncError::NotConnected) | Err(SyncError::Connection(_)) => {
                debug!(document = %entry.document.id, "connection went away, edits stay queued");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn SyncListener<S::Content>>) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn document(&self, document_id: &str) -> Result<ClientDocument<S::Content>> {
        self.store.get(document_id)
    }

    pub fn shadow(&self, document_id: &str) -> Result<Shadow<S::Content>> {
        self.store.shadow(document_id)
    }

    pub fn document_state(&self, document_id: &str) -> Result<DocumentState> {
        Ok(self.store.entry(document_id)?.lock().state)
    }

    pub fn pending_edits(&self, document_id: &str) -> Result<usize> {
        Ok(self.store.entry(document_id)?.lock().pending.len())
    }
}

fn check_addressee<C, D>(entry: &DocumentEntry<C, D>, message: &PatchMessage<D>) -> Result<()> {
    if entry.document.client_id == message.client_id {
        return Ok(());
    }
    warn!(
        document = %message.id,
        client = %message.client_id,
        kind = ?message.msg_type,
        "message addressed to another client"
    );
    Err(SyncError::Protocol(format!(
        "{:?} for {} addressed to client {}",
        message.msg_type, message.id, message.client_id
    )))
}

fn transition<C, D>(entry: &mut DocumentEntry<C, D>, next: DocumentState) {
    debug_assert!(
        entry.state.can_transition_to(next),
        "illegal transition {:?} -> {:?}",
        entry.state,
        next
    );
    trace!(document = %entry.document.id, from = ?entry.state, to = ?next, "state transition");
    entry.state = next;
}

impl<S: Synchronizer> InboundHandler<S::Diff> for SyncEngine<S> {
    fn on_message(&self, message: PatchMessage<S::Diff>) {
        if let Err(err) = self.receive_patch(message) {
            debug!("inbound message not applied: {err}");
        }
    }

    fn on_state(&self, state: ConnectionState) {
        if state == ConnectionState::Connected {
            self.resync_all();
        }
        self.listeners.notify_state(state);
    }

    fn on_error(&self, error: &SyncError) {
        self.listeners.notify_error(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Edit;
    use crate::synchronizer::{TextDiff, TextSynchronizer};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSender {
        connected: AtomicBool,
        generation: AtomicU64,
        sent: Mutex<Vec<PatchMessage<TextDiff>>>,
    }

    impl RecordingSender {
        fn kinds(&self) -> Vec<MessageType> {
            self.sent.lock().iter().map(|m| m.msg_type).collect()
        }
    }

    impl PatchSender<TextDiff> for RecordingSender {
        fn send(&self, message: &PatchMessage<TextDiff>) -> Result<()> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(SyncError::NotConnected);
            }
            self.sent.lock().push(message.clone());
            Ok(())
        }

        fn connection(&self) -> Option<u64> {
            self.connected
                .load(Ordering::SeqCst)
                .then(|| self.generation.load(Ordering::SeqCst))
        }
    }

    #[derive(Default)]
    struct Counter {
        patches: AtomicUsize,
    }

    impl SyncListener<String> for Counter {
        fn on_patch_applied(&self, _document: &ClientDocument<String>) -> anyhow::Result<()> {
            self.patches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine(connected: bool) -> (SyncEngine<TextSynchronizer>, Arc<RecordingSender>) {
        let sender = Arc::new(RecordingSender::default());
        sender.connected.store(connected, Ordering::SeqCst);
        (SyncEngine::new(TextSynchronizer::new(), sender.clone()), sender)
    }

    fn doc(content: &str) -> ClientDocument<String> {
        ClientDocument::new("doc1", "c1", content.to_string())
    }

    /// A server-side PATCH from `from` to `to` at `version`.
    fn server_patch(version: u64, from: &str, to: &str) -> PatchMessage<TextDiff> {
        let sync = TextSynchronizer::new();
        let from = from.to_string();
        let edit = Edit::new(version, sync.compute_diffs(&from, &to.to_string()))
            .with_checksum(sync.checksum(&from));
        PatchMessage::patch("doc1", "c1", vec![edit])
    }

    #[test]
    fn add_announces_when_connected() {
        let (engine, sender) = engine(true);
        engine.add_document(doc("hello")).unwrap();

        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type, MessageType::Add);
        assert!(sent[0].edits.is_empty());
        assert_eq!(engine.shadow("doc1").unwrap().version, 0);
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let (engine, _) = engine(false);
        engine.add_document(doc("a")).unwrap();
        assert!(matches!(
            engine.add_document(doc("b")),
            Err(SyncError::DuplicateDocument(_))
        ));
    }

    #[test]
    fn send_advances_shadow_and_ships_edit() {
        let (engine, sender) = engine(true);
        engine.add_document(doc("")).unwrap();

        assert_eq!(engine.diff_and_send(&doc("hello")).unwrap(), 1);

        let sent = sender.sent.lock();
        let patch = sent.last().unwrap();
        assert_eq!(patch.msg_type, MessageType::Patch);
        assert_eq!(patch.edits.len(), 1);
        assert_eq!(patch.edits[0].version, 0);
        assert_eq!(patch.edits[0].diffs, vec![TextDiff::add("hello")]);
        assert_eq!(engine.shadow("doc1").unwrap().content, "hello");
        assert_eq!(engine.document_state("doc1").unwrap(), DocumentState::Clean);
        assert_eq!(engine.pending_edits("doc1").unwrap(), 0);
    }

    #[test]
    fn unchanged_content_still_sends_an_empty_edit() {
        let (engine, sender) = engine(true);
        engine.add_document(doc("")).unwrap();
        engine.diff_and_send(&doc("same")).unwrap();
        assert_eq!(engine.diff_and_send(&doc("same")).unwrap(), 2);

        let sent = sender.sent.lock();
        assert!(sent.last().unwrap().edits[0].is_empty());
    }

    #[test]
    fn unregistered_document_cannot_be_sent() {
        let (engine, _) = engine(true);
        assert!(matches!(
            engine.diff_and_send(&doc("x")),
            Err(SyncError::NotRegistered(_))
        ));
    }

    #[test]
    fn offline_edits_queue_and_flush_on_connect() {
        let (engine, sender) = engine(false);
        engine.add_document(doc("")).unwrap();
        engine.diff_and_send(&doc("a")).unwrap();
        engine.diff_and_send(&doc("ab")).unwrap();
        assert_eq!(engine.pending_edits("doc1").unwrap(), 2);
        assert_eq!(engine.document_state("doc1").unwrap(), DocumentState::PendingSend);

        sender.connected.store(true, Ordering::SeqCst);
        engine.on_state(ConnectionState::Connected);

        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].msg_type, MessageType::Add);
        assert_eq!(sent[1].msg_type, MessageType::Patch);
        let versions: Vec<u64> = sent[1].edits.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![0, 1]);
        assert_eq!(engine.pending_edits("doc1").unwrap(), 0);
        assert_eq!(engine.document_state("doc1").unwrap(), DocumentState::Clean);
    }

    #[test]
    fn inbound_patch_updates_document_and_notifies() {
        let (engine, _) = engine(true);
        let counter = Arc::new(Counter::default());
        engine.subscribe(counter.clone());
        engine.add_document(doc("")).unwrap();
        engine.diff_and_send(&doc("hello")).unwrap();

        let outcome = engine
            .receive_patch(server_patch(1, "hello", "hello world"))
            .unwrap();

        assert_eq!(outcome, PatchOutcome::Applied { version: 2 });
        assert_eq!(engine.document("doc1").unwrap().content, "hello world");
        assert_eq!(engine.shadow("doc1").unwrap().content, "hello world");
        assert_eq!(counter.patches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_patch_is_discarded() {
        let (engine, _) = engine(true);
        let counter = Arc::new(Counter::default());
        engine.subscribe(counter.clone());
        engine.add_document(doc("")).unwrap();
        engine.diff_and_send(&doc("hello")).unwrap();

        let err = engine
            .receive_patch(server_patch(5, "hello", "bye"))
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::VersionConflict { edit_version: 5, shadow_version: 1, .. }
        ));
        assert_eq!(engine.shadow("doc1").unwrap().version, 1);
        assert_eq!(engine.document("doc1").unwrap().content, "hello");
        assert_eq!(engine.document_state("doc1").unwrap(), DocumentState::Clean);
        assert_eq!(counter.patches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn applying_the_same_patch_twice_conflicts() {
        let (engine, _) = engine(true);
        engine.add_document(doc("")).unwrap();
        engine.diff_and_send(&doc("hello")).unwrap();

        let patch = server_patch(1, "hello", "hello!");
        engine.receive_patch(patch.clone()).unwrap();
        assert!(matches!(
            engine.receive_patch(patch),
            Err(SyncError::VersionConflict { .. })
        ));
        assert_eq!(engine.shadow("doc1").unwrap().version, 2);
    }

    #[test]
    fn multi_edit_patch_is_all_or_nothing() {
        let (engine, _) = engine(true);
        engine.add_document(doc("")).unwrap();
        engine.diff_and_send(&doc("a")).unwrap();

        let mut message = server_patch(1, "a", "ab");
        let bad = server_patch(9, "ab", "abc").edits.remove(0);
        message.edits.push(bad);

        assert!(engine.receive_patch(message).is_err());
        assert_eq!(engine.shadow("doc1").unwrap().version, 1);
        assert_eq!(engine.document("doc1").unwrap().content, "a");
    }

    #[test]
    fn checksum_mismatch_is_malformed() {
        let (engine, _) = engine(true);
        engine.add_document(doc("")).unwrap();
        engine.diff_and_send(&doc("a")).unwrap();

        let mut message = server_patch(1, "a", "ab");
        message.edits[0].checksum = Some("00".into());
        assert!(matches!(
            engine.receive_patch(message),
            Err(SyncError::MalformedEdit(_))
        ));
    }

    #[test]
    fn patch_for_other_client_is_a_protocol_violation() {
        let (engine, _) = engine(true);
        engine.add_document(doc("")).unwrap();
        let mut message = server_patch(0, "", "x");
        message.client_id = "someone-else".into();
        assert!(matches!(
            engine.receive_patch(message),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn patch_for_unknown_document_is_not_registered() {
        let (engine, _) = engine(true);
        assert!(matches!(
            engine.receive_patch(server_patch(0, "", "x")),
            Err(SyncError::NotRegistered(_))
        ));
    }

    #[test]
    fn detach_drops_the_document_and_add_is_ignored() {
        let (engine, _) = engine(true);
        engine.add_document(doc("")).unwrap();

        assert_eq!(
            engine.receive_patch(PatchMessage::add("doc1", "c1")).unwrap(),
            PatchOutcome::Ignored
        );
        assert_eq!(
            engine.receive_patch(PatchMessage::detach("doc1", "c1")).unwrap(),
            PatchOutcome::Detached
        );
        assert!(matches!(engine.document("doc1"), Err(SyncError::NotFound(_))));
        assert_eq!(
            engine.receive_patch(PatchMessage::detach("doc1", "c1")).unwrap(),
            PatchOutcome::Ignored
        );
    }

    #[test]
    fn detach_for_another_client_keeps_the_document() {
        let (engine, _) = engine(true);
        engine.add_document(doc("x")).unwrap();

        assert!(matches!(
            engine.receive_patch(PatchMessage::detach("doc1", "someone-else")),
            Err(SyncError::Protocol(_))
        ));
        assert_eq!(engine.document("doc1").unwrap().content, "x");
    }

    #[test]
    fn edit_sent_before_connect_notification_follows_its_add() {
        let (engine, sender) = engine(false);
        engine.add_document(doc("")).unwrap();
        engine.diff_and_send(&doc("a")).unwrap();
        assert!(sender.sent.lock().is_empty());

        // the transport is up but the engine has not heard about it yet
        sender.connected.store(true, Ordering::SeqCst);
        engine.diff_and_send(&doc("ab")).unwrap();
        assert_eq!(sender.kinds(), vec![MessageType::Add, MessageType::Patch]);
        assert_eq!(sender.sent.lock()[1].edits.len(), 2);

        // the late notification does not repeat the announcement
        engine.on_state(ConnectionState::Connected);
        assert_eq!(sender.kinds(), vec![MessageType::Add, MessageType::Patch]);
    }

    #[test]
    fn every_new_connection_gets_announced_again() {
        let (engine, sender) = engine(true);
        engine.add_document(doc("")).unwrap();
        engine.on_state(ConnectionState::Connected);
        assert_eq!(sender.kinds(), vec![MessageType::Add]);

        sender.generation.fetch_add(1, Ordering::SeqCst);
        engine.on_state(ConnectionState::Connected);
        assert_eq!(sender.kinds(), vec![MessageType::Add, MessageType::Add]);
    }

    #[test]
    fn locked_document_does_not_block_others() {
        let (engine, _) = engine(true);
        engine.add_document(ClientDocument::new("docA", "c1", String::new())).unwrap();
        engine.add_document(ClientDocument::new("docB", "c1", String::new())).unwrap();

        let handle = engine.store.entry("docA").unwrap();
        let guard = handle.lock();
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        std::thread::scope(|scope| {
            let engine = &engine;
            let other = done_tx.clone();
            scope.spawn(move || {
                let version = engine
                    .diff_and_send(&ClientDocument::new("docB", "c1", "b".to_string()))
                    .unwrap();
                other.send(("docB", version)).unwrap();
            });
            scope.spawn(move || {
                let version = engine
                    .diff_and_send(&ClientDocument::new("docA", "c1", "a".to_string()))
                    .unwrap();
                done_tx.send(("docA", version)).unwrap();
            });

            assert_eq!(
                done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
                ("docB", 1)
            );
            // docA waits for the lock held above
            assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
            drop(guard);
            assert_eq!(
                done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
                ("docA", 1)
            );
        });
    }

    #[test]
    fn unknown_message_type_is_ignored() {
        let (engine, _) = engine(true);
        let message = PatchMessage::<TextDiff>::new(MessageType::Unknown, "doc1", "c1", vec![]);
        assert_eq!(engine.receive_patch(message).unwrap(), PatchOutcome::Ignored);
    }

    #[test]
    fn listener_may_call_back_into_the_engine() {
        struct Echo {
            engine: Mutex<Option<Arc<SyncEngine<TextSynchronizer>>>>,
        }

        impl SyncListener<String> for Echo {
            fn on_patch_applied(&self, document: &ClientDocument<String>) -> anyhow::Result<()> {
                if let Some(engine) = self.engine.lock().as_ref() {
                    engine.diff_and_send(&document.with_content(format!("{}!", document.content)))?;
                }
                Ok(())
            }
        }

        let (engine, sender) = engine(true);
        let engine = Arc::new(engine);
        let echo = Arc::new(Echo {
            engine: Mutex::new(Some(Arc::clone(&engine))),
        });
        engine.subscribe(echo.clone());
        engine.add_document(doc("")).unwrap();

        engine.receive_patch(server_patch(0, "", "hi")).unwrap();
        assert_eq!(engine.document("doc1").unwrap().content, "hi!");
        assert_eq!(engine.shadow("doc1").unwrap().version, 2);
        assert_eq!(sender.sent.lock().last().unwrap().edits[0].version, 1);

        // break the Arc cycle
        echo.engine.lock().take();
    }
}
