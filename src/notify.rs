//! Fire-and-forget mail delivery.
//!
//! The core only ever enqueues. [`MailOutbox`] hands messages to a dispatcher
//! thread which drives a [`MailTransport`]; a failed delivery is logged and dropped.
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Mail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("mail outbox is full")]
    Full,
    #[error("mail outbox is closed")]
    Closed,
    #[error("mail transport failed: {0}")]
    Transport(String),
}

pub trait Notifier: Send + Sync {
    /// Queues `mail` for delivery without waiting for it.
    fn enqueue(&self, mail: Mail) -> Result<(), NotifyError>;
}

pub trait MailTransport: Send + 'static {
    fn deliver(&mut self, mail: &Mail) -> Result<(), NotifyError>;
}

/// Transport that only records deliveries in the log.
#[derive(Debug, Default)]
pub struct LogTransport;

impl MailTransport for LogTransport {
    fn deliver(&mut self, mail: &Mail) -> Result<(), NotifyError> {
        info!(to = %mail.to, subject = %mail.subject, "mail delivered");
        Ok(())
    }
}

pub struct MailOutbox {
    sender: Sender<Mail>,
}

impl MailOutbox {
    /// Starts the dispatcher. It exits once every outbox handle is dropped and the queue drained.
    pub fn spawn<T: MailTransport>(capacity: usize, transport: T) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let handle = thread::spawn(move || dispatch(receiver, transport));

        (Self { sender }, handle)
    }
}

fn dispatch<T: MailTransport>(receiver: Receiver<Mail>, mut transport: T) {
    for mail in receiver.iter() {
        if let Err(err) = transport.deliver(&mail) {
            warn!(to = %mail.to, subject = %mail.subject, error = %err, "mail delivery failed");
        }
    }
    debug!("mail outbox drained");
}

impl Notifier for MailOutbox {
    fn enqueue(&self, mail: Mail) -> Result<(), NotifyError> {
        self.sender.try_send(mail).map_err(|err| match err {
            TrySendError::Full(_) => NotifyError::Full,
            TrySendError::Disconnected(_) => NotifyError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Capture(Arc<Mutex<Vec<Mail>>>);

    impl MailTransport for Capture {
        fn deliver(&mut self, mail: &Mail) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    #[test]
    fn outbox_delivers_in_order_and_drains_on_drop() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (outbox, handle) = MailOutbox::spawn(8, Capture(sent.clone()));

        outbox.enqueue(Mail::new("a@shop.test", "one", "1")).unwrap();
        outbox.enqueue(Mail::new("b@shop.test", "two", "2")).unwrap();
        drop(outbox);
        handle.join().unwrap();

        let sent = sent.lock().unwrap();
        let subjects: Vec<_> = sent.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, ["one", "two"]);
    }
}
