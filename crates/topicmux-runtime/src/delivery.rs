//! Per-recipient delivery workers.
//!
//! Each recipient gets its own [`DeliveryQueue`] and one worker task that
//! drains it in order, honoring the minimum send interval. A worker is
//! spawned the first time something is queued for its recipient.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, Notify, mpsc};
use tokio::time::Instant;

use topicmux_core::types::{ContentKind, DeliveryMode, Notification, TopicKey};
use topicmux_daemon::delivery::{
    DeliveryQueue, DeliveryUnit, MessageId, QueuePolicy, QueuedItem, SentRefs,
};

use crate::transport::{Transport, TransportError, render, run_blocking};

/// A unit that reached the chat, reported back for last-read tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub topic: TopicKey,
    pub source_offset: u64,
}

struct RecipientQueue {
    queue: Mutex<DeliveryQueue>,
    notify: Notify,
}

pub struct DeliveryHub {
    policy: QueuePolicy,
    transport: Arc<dyn Transport>,
    recipients: StdMutex<HashMap<i64, Arc<RecipientQueue>>>,
    sent: Arc<StdMutex<SentRefs>>,
    delivered: mpsc::UnboundedSender<Delivered>,
}

impl DeliveryHub {
    pub fn new(
        policy: QueuePolicy,
        transport: Arc<dyn Transport>,
        delivered: mpsc::UnboundedSender<Delivered>,
    ) -> Self {
        Self {
            policy,
            transport,
            recipients: StdMutex::new(HashMap::new()),
            sent: Arc::new(StdMutex::new(SentRefs::new())),
            delivered,
        }
    }

    /// Queue an item for its topic's recipient. Returns `false` when the
    /// topic is closed.
    pub async fn enqueue(&self, item: QueuedItem) -> bool {
        let rq = self.recipient_queue(item.topic.recipient);
        let accepted = rq.queue.lock().await.enqueue(item);
        if accepted {
            rq.notify.notify_one();
        }
        accepted
    }

    /// Drop queued items and edit targets for `topic` and refuse new ones
    /// until [`reopen_topic`](Self::reopen_topic).
    pub async fn cancel_topic(&self, topic: TopicKey) -> usize {
        if let Ok(mut sent) = self.sent.lock() {
            sent.forget_topic(topic);
        }
        self.recipient_queue(topic.recipient)
            .queue
            .lock()
            .await
            .cancel_topic(topic)
    }

    pub async fn reopen_topic(&self, topic: TopicKey) {
        if let Some(rq) = self.existing(topic.recipient) {
            rq.queue.lock().await.reopen_topic(topic);
        }
    }

    /// Forget edit targets of a session that ended.
    pub fn forget_session(&self, session_id: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.forget_session(session_id);
        }
    }

    /// Forget edit targets of invocations the session's tail gave up on.
    pub fn forget_invocations(&self, session_id: &str, invocation_ids: &[String]) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.forget_invocations(session_id, invocation_ids);
        }
    }

    /// Queued items per recipient.
    pub async fn queue_lengths(&self) -> Vec<(i64, usize)> {
        let queues: Vec<(i64, Arc<RecipientQueue>)> = match self.recipients.lock() {
            Ok(map) => map.iter().map(|(r, q)| (*r, Arc::clone(q))).collect(),
            Err(_) => return Vec::new(),
        };
        let mut out = Vec::with_capacity(queues.len());
        for (recipient, rq) in queues {
            out.push((recipient, rq.queue.lock().await.len()));
        }
        out.sort_unstable();
        out
    }

    fn existing(&self, recipient: i64) -> Option<Arc<RecipientQueue>> {
        self.recipients.lock().ok()?.get(&recipient).cloned()
    }

    fn recipient_queue(&self, recipient: i64) -> Arc<RecipientQueue> {
        let mut map = match self.recipients.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(rq) = map.get(&recipient) {
            return Arc::clone(rq);
        }

        let rq = Arc::new(RecipientQueue {
            queue: Mutex::new(DeliveryQueue::new(recipient, self.policy)),
            notify: Notify::new(),
        });
        map.insert(recipient, Arc::clone(&rq));
        tracing::debug!(recipient, "starting delivery worker");
        tokio::spawn(run_worker(
            Arc::clone(&rq),
            Arc::clone(&self.transport),
            Arc::clone(&self.sent),
            self.delivered.clone(),
        ));
        rq
    }
}

async fn run_worker(
    rq: Arc<RecipientQueue>,
    transport: Arc<dyn Transport>,
    sent: Arc<StdMutex<SentRefs>>,
    delivered: mpsc::UnboundedSender<Delivered>,
) {
    loop {
        let wait = {
            let q = rq.queue.lock().await;
            (!q.is_empty()).then(|| q.wait_time(Instant::now().into_std()))
        };
        match wait {
            None => {
                rq.notify.notified().await;
                continue;
            }
            Some(d) if !d.is_zero() => tokio::time::sleep(d).await,
            Some(_) => {}
        }

        // The queue may have been cancelled while we slept.
        let Some(unit) = rq.queue.lock().await.pop_unit() else {
            continue;
        };

        let result = deliver_unit(&transport, &sent, &unit).await;
        let mut q = rq.queue.lock().await;
        q.mark_sent(Instant::now().into_std());
        match result {
            Ok(()) => {
                if let Some(offset) = unit.source_offset {
                    let _ = delivered.send(Delivered {
                        topic: unit.topic,
                        source_offset: offset,
                    });
                }
            }
            Err(e) if unit.notification.content == ContentKind::Error => {
                tracing::error!(topic = %unit.topic, error = %e, "dropping undeliverable error notice");
            }
            Err(e) => {
                tracing::error!(topic = %unit.topic, error = %e, "delivery failed after retry");
                let notice = Notification::error(
                    unit.notification.session_id.clone(),
                    format!("Failed to deliver a message: {e}"),
                );
                q.enqueue(QueuedItem::new(unit.topic, notice, None));
            }
        }
    }
}

/// Send or edit one unit; on failure retry once with plain rendering.
async fn deliver_unit(
    transport: &Arc<dyn Transport>,
    sent: &Arc<StdMutex<SentRefs>>,
    unit: &DeliveryUnit,
) -> Result<(), TransportError> {
    let edit_target = match &unit.notification.mode {
        DeliveryMode::EditOf { target } => sent.lock().ok().and_then(|mut s| s.take(unit.topic, target)),
        DeliveryMode::New => None,
    };

    let first = transmit(transport, unit.topic, edit_target, render(&unit.notification, false)).await;
    let message_id = match first {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(topic = %unit.topic, error = %e, "send failed, retrying without formatting");
            transmit(transport, unit.topic, edit_target, render(&unit.notification, true)).await?
        }
    };

    if let Some(id) = message_id
        && let Ok(mut s) = sent.lock()
    {
        s.record(unit.topic, &unit.notification, id);
    }
    Ok(())
}

/// Edit `edit_target` if there is one, else send a new message and return
/// its id.
async fn transmit(
    transport: &Arc<dyn Transport>,
    topic: TopicKey,
    edit_target: Option<MessageId>,
    text: String,
) -> Result<Option<MessageId>, TransportError> {
    run_blocking(transport, move |t| match edit_target {
        Some(id) => t.edit(topic, id, &text).map(|()| None),
        None => t.send(topic, &text).map(Some),
    })
    .await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    use topicmux_core::types::{NotificationRef, Role};

    /// Records every transport call and can be told to fail the next N sends.
    #[derive(Default)]
    pub(crate) struct MockTransport {
        pub calls: StdMutex<Vec<String>>,
        pub fail_sends: StdMutex<usize>,
        /// Runs inside `create_topic`, before it returns.
        pub on_create: StdMutex<Option<Box<dyn Fn() + Send>>>,
        next_id: StdMutex<MessageId>,
        tx: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    }

    impl MockTransport {
        pub(crate) fn with_channel() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let t = Self::default();
            *t.tx.lock().expect("test") = Some(tx);
            (Arc::new(t), rx)
        }

        fn log(&self, entry: String) {
            self.calls.lock().expect("test").push(entry.clone());
            if let Some(tx) = self.tx.lock().expect("test").as_ref() {
                let _ = tx.send(entry);
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("test").clone()
        }
    }

    impl Transport for MockTransport {
        fn send(&self, topic: TopicKey, text: &str) -> Result<MessageId, TransportError> {
            {
                let mut fail = self.fail_sends.lock().expect("test");
                if *fail > 0 {
                    *fail -= 1;
                    return Err(TransportError::Rejected("bad markup".into()));
                }
            }
            let mut next = self.next_id.lock().expect("test");
            *next += 1;
            self.log(format!("send {topic} #{} {text}", *next));
            Ok(*next)
        }

        fn edit(&self, topic: TopicKey, message_id: MessageId, text: &str) -> Result<(), TransportError> {
            self.log(format!("edit {topic} #{message_id} {text}"));
            Ok(())
        }

        fn delete(&self, topic: TopicKey, message_id: MessageId) -> Result<(), TransportError> {
            self.log(format!("delete {topic} #{message_id}"));
            Ok(())
        }

        fn create_topic(&self, recipient: i64, name: &str) -> Result<i64, TransportError> {
            if let Some(hook) = self.on_create.lock().expect("test").as_ref() {
                hook();
            }
            self.log(format!("create {recipient} {name}"));
            Ok(900)
        }
    }

    const TOPIC: TopicKey = TopicKey::new(1, 10);

    fn text(s: &str) -> Notification {
        Notification {
            session_id: "s1".into(),
            content: ContentKind::Text,
            role: Role::Assistant,
            text: s.into(),
            invocation_id: None,
            tool_name: None,
            mode: DeliveryMode::New,
            timestamp: None,
        }
    }

    fn hub(transport: Arc<MockTransport>) -> (DeliveryHub, mpsc::UnboundedReceiver<Delivered>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DeliveryHub::new(QueuePolicy::default(), transport, tx), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("test")
            .expect("test")
    }

    #[tokio::test(start_paused = true)]
    async fn sends_in_order_with_rate_limit() {
        let (transport, mut calls) = MockTransport::with_channel();
        let (hub, mut delivered) = hub(Arc::clone(&transport));
        let start = Instant::now();

        // An invocation between texts keeps them from merging.
        let mut invocation = text("**Read**(a.rs)");
        invocation.content = ContentKind::Invocation;
        invocation.invocation_id = Some("t1".into());

        hub.enqueue(QueuedItem::new(TOPIC, text("one"), Some(10))).await;
        hub.enqueue(QueuedItem::new(TOPIC, invocation, Some(20))).await;
        hub.enqueue(QueuedItem::new(TOPIC, text("two"), Some(30))).await;

        assert!(next(&mut calls).await.ends_with("one"));
        let second = next(&mut calls).await;
        assert!(second.contains("**Read**"));
        assert!(start.elapsed() >= Duration::from_millis(1100));
        assert!(next(&mut calls).await.ends_with("two"));
        assert!(start.elapsed() >= Duration::from_millis(2200));

        let offsets: Vec<u64> = [
            delivered.recv().await.expect("test"),
            delivered.recv().await.expect("test"),
            delivered.recv().await.expect("test"),
        ]
        .iter()
        .map(|d| d.source_offset)
        .collect();
        assert_eq!(offsets, vec![10, 20, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn result_edits_the_invocation_message() {
        let (transport, mut calls) = MockTransport::with_channel();
        let (hub, _delivered) = hub(Arc::clone(&transport));

        let mut invocation = text("**Bash**(ls)");
        invocation.content = ContentKind::Invocation;
        invocation.invocation_id = Some("t1".into());
        let mut result = text("**Bash**(ls)\n  ⎿ 3 lines");
        result.content = ContentKind::Result;
        result.invocation_id = Some("t1".into());
        result.mode = DeliveryMode::EditOf {
            target: NotificationRef {
                session_id: "s1".into(),
                invocation_id: "t1".into(),
            },
        };

        hub.enqueue(QueuedItem::new(TOPIC, invocation, None)).await;
        hub.enqueue(QueuedItem::new(TOPIC, result, None)).await;

        assert_eq!(next(&mut calls).await, "send 1:10 #1 **Bash**(ls)");
        assert_eq!(next(&mut calls).await, "edit 1:10 #1 **Bash**(ls)\n  ⎿ 3 lines");
    }

    #[tokio::test(start_paused = true)]
    async fn forgotten_invocation_is_not_edited() {
        let (transport, mut calls) = MockTransport::with_channel();
        let (hub, _delivered) = hub(Arc::clone(&transport));

        let mut invocation = text("**Bash**(sleep 900)");
        invocation.content = ContentKind::Invocation;
        invocation.invocation_id = Some("t1".into());
        hub.enqueue(QueuedItem::new(TOPIC, invocation, None)).await;
        assert_eq!(next(&mut calls).await, "send 1:10 #1 **Bash**(sleep 900)");

        hub.forget_invocations("s1", &["t1".to_string()]);

        let mut result = text("late result");
        result.content = ContentKind::Result;
        result.mode = DeliveryMode::EditOf {
            target: NotificationRef {
                session_id: "s1".into(),
                invocation_id: "t1".into(),
            },
        };
        hub.enqueue(QueuedItem::new(TOPIC, result, None)).await;
        let resent = next(&mut calls).await;
        assert!(resent.starts_with("send 1:10 #2"), "{resent}");
    }

    #[tokio::test(start_paused = true)]
    async fn edit_without_known_target_is_sent_new() {
        let (transport, mut calls) = MockTransport::with_channel();
        let (hub, _delivered) = hub(Arc::clone(&transport));

        let mut result = text("late result");
        result.content = ContentKind::Result;
        result.mode = DeliveryMode::EditOf {
            target: NotificationRef {
                session_id: "s1".into(),
                invocation_id: "gone".into(),
            },
        };
        hub.enqueue(QueuedItem::new(TOPIC, result, None)).await;
        assert!(next(&mut calls).await.starts_with("send 1:10"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_retries_plain() {
        let (transport, mut calls) = MockTransport::with_channel();
        *transport.fail_sends.lock().expect("test") = 1;
        let (hub, _delivered) = hub(Arc::clone(&transport));

        let mut user = text("hello");
        user.role = Role::User;
        hub.enqueue(QueuedItem::new(TOPIC, user, None)).await;

        // The decorated attempt failed; the retry is the raw text.
        assert_eq!(next(&mut calls).await, "send 1:10 #1 hello");
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_queues_an_error_notice() {
        let (transport, mut calls) = MockTransport::with_channel();
        *transport.fail_sends.lock().expect("test") = 2;
        let (hub, _delivered) = hub(Arc::clone(&transport));

        hub.enqueue(QueuedItem::new(TOPIC, text("lost"), Some(5))).await;
        let notice = next(&mut calls).await;
        assert!(notice.contains("⚠️ Failed to deliver a message"), "{notice}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_topic_refuses_items_until_reopened() {
        let (transport, mut calls) = MockTransport::with_channel();
        let (hub, _delivered) = hub(Arc::clone(&transport));

        hub.cancel_topic(TOPIC).await;
        assert!(!hub.enqueue(QueuedItem::new(TOPIC, text("dropped"), None)).await);

        hub.reopen_topic(TOPIC).await;
        assert!(hub.enqueue(QueuedItem::new(TOPIC, text("kept"), None)).await);
        assert!(next(&mut calls).await.ends_with("kept"));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recipients_are_independent() {
        let (transport, mut calls) = MockTransport::with_channel();
        let (hub, _delivered) = hub(Arc::clone(&transport));
        let start = Instant::now();

        hub.enqueue(QueuedItem::new(TopicKey::new(1, 1), text("a"), None)).await;
        hub.enqueue(QueuedItem::new(TopicKey::new(2, 1), text("b"), None)).await;
        next(&mut calls).await;
        next(&mut calls).await;
        assert!(start.elapsed() < Duration::from_millis(1100));
        assert_eq!(hub.queue_lengths().await, vec![(1, 0), (2, 0)]);
    }
}
