#![allow(dead_code)]

use std::time::Duration;

use diffsync::{ClientDocument, ConnectionState, SyncError, SyncListener};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum Event<C> {
    Patch(ClientDocument<C>),
    State(ConnectionState),
    Error(String),
}

/// Forwards every listener callback into a channel the test can await.
pub struct Recorder<C> {
    tx: mpsc::UnboundedSender<Event<C>>,
}

impl<C> Recorder<C> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event<C>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl<C: Clone + Send + Sync + 'static> SyncListener<C> for Recorder<C> {
    fn on_patch_applied(&self, document: &ClientDocument<C>) -> anyhow::Result<()> {
        let _ = self.tx.send(Event::Patch(document.clone()));
        Ok(())
    }

    fn on_connection_state(&self, state: ConnectionState) -> anyhow::Result<()> {
        let _ = self.tx.send(Event::State(state));
        Ok(())
    }

    fn on_connection_error(&self, error: &SyncError) -> anyhow::Result<()> {
        let _ = self.tx.send(Event::Error(error.to_string()));
        Ok(())
    }
}

pub async fn next_patch<C>(rx: &mut mpsc::UnboundedReceiver<Event<C>>) -> ClientDocument<C> {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(Event::Patch(doc)) => return doc,
                Some(_) => continue,
                None => panic!("listener channel closed"),
            }
        }
    })
    .await
    .expect("no patch notification")
}

pub async fn wait_state<C>(rx: &mut mpsc::UnboundedReceiver<Event<C>>, expected: ConnectionState) {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(Event::State(state)) if state == expected => return,
                Some(_) => continue,
                None => panic!("listener channel closed"),
            }
        }
    })
    .await
    .expect("state never reached");
}

pub async fn next_error<C>(rx: &mut mpsc::UnboundedReceiver<Event<C>>) -> String {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(Event::Error(err)) => return err,
                Some(_) => continue,
                None => panic!("listener channel closed"),
            }
        }
    })
    .await
    .expect("no error notification")
}

pub fn reserve_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
