// SPDX-License-Identifier: MPL-2.0

//! Inter-thread message ports.
//!
//! A port is a bounded FIFO of `{target handler, code, payload}` messages.
//! Backpressure comes from a pair of semaphores: the send semaphore starts
//! at the port's capacity and the receive semaphore at zero, so senders
//! block when the queue is full and receivers when it is empty. Payloads up
//! to [`MAX_CACHED_MESSAGE_SIZE`] bytes are carved from a process-wide
//! buffer pool refilled under an interrupt-safe lock, keeping short message
//! traffic allocation-free in steady state.

use crate::config::{MAX_CACHED_MESSAGE_COUNT, MAX_CACHED_MESSAGE_SIZE};
use crate::object::{
    self, KernelObject, ObjectMeta, ObjectType, TypedObject,
};
use crate::prelude::*;
use crate::sched::wait::{WaitList, WaitMode, WaitNode, WaitableObject};
use crate::sync::Semaphore;
use crate::time::{deadline_after, TimeValNanos};

pub type HandlerId = i32;

static MESSAGE_POOL: SpinLock<Vec<Box<[u8; MAX_CACHED_MESSAGE_SIZE]>>> =
    SpinLock::new(Vec::new());

enum Payload {
    Pooled {
        buffer: Option<Box<[u8; MAX_CACHED_MESSAGE_SIZE]>>,
        length: usize,
    },
    Heap(Vec<u8>),
}

impl Payload {
    fn new(data: &[u8]) -> Payload {
        if data.len() <= MAX_CACHED_MESSAGE_SIZE {
            let mut buffer = {
                let mut pool = MESSAGE_POOL.lock_irq_disabled();
                pool.pop()
            }
            .unwrap_or_else(|| Box::new([0u8; MAX_CACHED_MESSAGE_SIZE]));
            buffer[..data.len()].copy_from_slice(data);
            Payload::Pooled {
                buffer: Some(buffer),
                length: data.len(),
            }
        } else {
            Payload::Heap(data.to_vec())
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            Payload::Pooled {
                buffer: Some(buffer),
                length,
            } => &buffer[..*length],
            Payload::Pooled { buffer: None, .. } => &[],
            Payload::Heap(data) => data,
        }
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        if let Payload::Pooled { buffer, .. } = self {
            if let Some(buffer) = buffer.take() {
                let mut pool = MESSAGE_POOL.lock_irq_disabled();
                if pool.len() < MAX_CACHED_MESSAGE_COUNT {
                    pool.push(buffer);
                }
            }
        }
    }
}

struct Message {
    target_handler: HandlerId,
    code: i32,
    payload: Payload,
}

/// A bounded FIFO of typed messages between threads and handlers.
pub struct MessagePort {
    meta: ObjectMeta,
    queue: SpinLock<VecDeque<Message>>,
    send_slots: Semaphore,
    pending: Semaphore,
    read_listeners: WaitList,
    write_listeners: WaitList,
}

impl MessagePort {
    pub fn new(name: &str, max_count: usize) -> MessagePort {
        MessagePort {
            meta: ObjectMeta::new(name, ObjectType::MessagePort),
            queue: SpinLock::new(VecDeque::new()),
            send_slots: Semaphore::new("message_port_send", max_count, max_count),
            pending: Semaphore::new("message_port_receive", 0, max_count),
            read_listeners: WaitList::new(),
            write_listeners: WaitList::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.meta.name()
    }

    /// Messages currently queued.
    pub fn pending_count(&self) -> usize {
        self.queue.lock_irq_disabled().len()
    }

    /// Enqueue a message, blocking up to `timeout` for a free slot.
    pub fn send(
        &self,
        target_handler: HandlerId,
        code: i32,
        data: &[u8],
        timeout: TimeValNanos,
    ) -> Result<()> {
        self.send_deadline(target_handler, code, data, deadline_after(timeout))
    }

    pub fn send_deadline(
        &self,
        target_handler: HandlerId,
        code: i32,
        data: &[u8],
        deadline: TimeValNanos,
    ) -> Result<()> {
        self.send_slots.acquire_deadline(deadline)?;
        let message = Message {
            target_handler,
            code,
            payload: Payload::new(data),
        };
        self.queue.lock_irq_disabled().push_back(message);
        // One receiver per message; the listeners see every arrival.
        let _ = self.pending.release(1);
        self.read_listeners.wake_all();
        Ok(())
    }

    /// Dequeue the oldest message into `buffer`.
    ///
    /// Returns `(target_handler, code, bytes_copied)`; payload bytes beyond
    /// the buffer are silently dropped.
    pub fn receive(&self, buffer: &mut [u8]) -> Result<(HandlerId, i32, usize)> {
        self.pending.acquire()?;
        self.detach_message(buffer)
    }

    pub fn receive_timeout(
        &self,
        buffer: &mut [u8],
        timeout: TimeValNanos,
    ) -> Result<(HandlerId, i32, usize)> {
        self.pending.acquire_timeout(timeout)?;
        self.detach_message(buffer)
    }

    pub fn receive_deadline(
        &self,
        buffer: &mut [u8],
        deadline: TimeValNanos,
    ) -> Result<(HandlerId, i32, usize)> {
        self.pending.acquire_deadline(deadline)?;
        self.detach_message(buffer)
    }

    fn detach_message(&self, buffer: &mut [u8]) -> Result<(HandlerId, i32, usize)> {
        let message = {
            let mut queue = self.queue.lock_irq_disabled();
            queue.pop_front()
        };
        let Some(message) = message else {
            // The receive semaphore said a message was there.
            error!(
                "message port '{}': receive semaphore out of sync with queue",
                self.name()
            );
            return Err(Error::new(ErrorCode::BadState));
        };
        let _ = self.send_slots.release(1);
        self.write_listeners.wake_all();

        let payload = message.payload.bytes();
        let copied = payload.len().min(buffer.len());
        buffer[..copied].copy_from_slice(&payload[..copied]);
        Ok((message.target_handler, message.code, copied))
    }
}

impl KernelObject for MessagePort {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl TypedObject for MessagePort {
    const TYPE: ObjectType = ObjectType::MessagePort;
}

impl WaitableObject for MessagePort {
    fn add_listener(&self, node: &Arc<WaitNode>, mode: WaitMode) {
        match mode {
            WaitMode::Read => self.read_listeners.append(node),
            WaitMode::Write => self.write_listeners.append(node),
            WaitMode::ReadWrite => {
                self.read_listeners.append(node);
                self.write_listeners.append(node);
            }
        }
    }

    fn remove_listener(&self, node: &Arc<WaitNode>, mode: WaitMode) {
        match mode {
            WaitMode::Read => self.read_listeners.remove(node),
            WaitMode::Write => self.write_listeners.remove(node),
            WaitMode::ReadWrite => {
                self.read_listeners.remove(node);
                self.write_listeners.remove(node);
            }
        }
    }
}

impl Drop for MessagePort {
    fn drop(&mut self) {
        self.read_listeners.wake_all_target_deleted();
        self.write_listeners.wake_all_target_deleted();
    }
}

impl Debug for MessagePort {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessagePort")
            .field("name", &self.name())
            .field("pending", &self.pending_count())
            .finish()
    }
}

// The handle-based system call surface.

/// Create a port and register it, returning its handle.
pub fn create_message_port(name: &str, max_count: usize) -> Result<i32> {
    object::register_object(Arc::new(MessagePort::new(name, max_count)))
}

/// Release one handle to a port.
pub fn delete_message_port(handle: i32) -> Result<()> {
    object::free_handle_typed(handle, ObjectType::MessagePort)
}

/// Allocate a second handle to the same port.
pub fn duplicate_message_port(handle: i32) -> Result<i32> {
    object::get_object::<MessagePort>(handle).ok_or(Error::new(ErrorCode::InvalidArgument))?;
    object::duplicate_handle(handle)
}

pub fn send_message(
    handle: i32,
    target_handler: HandlerId,
    code: i32,
    data: &[u8],
    timeout: TimeValNanos,
) -> Result<()> {
    object::forward_to_handle_restartable::<MessagePort, _, _>(
        handle,
        ErrorCode::InvalidArgument,
        |port| port.send(target_handler, code, data, timeout),
    )
}

pub fn receive_message(handle: i32, buffer: &mut [u8]) -> Result<(HandlerId, i32, usize)> {
    object::forward_to_handle::<MessagePort, _, _>(handle, ErrorCode::InvalidArgument, |port| {
        port.receive(buffer)
    })
}

pub fn receive_message_timeout(
    handle: i32,
    buffer: &mut [u8],
    timeout: TimeValNanos,
) -> Result<(HandlerId, i32, usize)> {
    object::forward_to_handle::<MessagePort, _, _>(handle, ErrorCode::InvalidArgument, |port| {
        port.receive_timeout(buffer, timeout)
    })
}

pub fn receive_message_deadline(
    handle: i32,
    buffer: &mut [u8],
    deadline: TimeValNanos,
) -> Result<(HandlerId, i32, usize)> {
    object::forward_to_handle::<MessagePort, _, _>(handle, ErrorCode::InvalidArgument, |port| {
        port.receive_deadline(buffer, deadline)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{spawn_thread, wait_for_thread};

    #[test]
    fn messages_round_trip_in_order() {
        let port = MessagePort::new("round_trip", 8);
        port.send(7, 100, b"first", TimeValNanos::INFINITE).unwrap();
        port.send(9, 200, b"second", TimeValNanos::INFINITE).unwrap();

        let mut buf = [0u8; 32];
        let (handler, code, len) = port.receive(&mut buf).unwrap();
        assert_eq!((handler, code, &buf[..len]), (7, 100, &b"first"[..]));
        let (handler, code, len) = port.receive(&mut buf).unwrap();
        assert_eq!((handler, code, &buf[..len]), (9, 200, &b"second"[..]));
    }

    #[test]
    fn oversized_payloads_truncate_to_the_receive_buffer() {
        let port = MessagePort::new("truncate", 2);
        let big = [0xABu8; 200];
        port.send(0, 1, &big, TimeValNanos::INFINITE).unwrap();
        let mut buf = [0u8; 16];
        let (_, _, len) = port.receive(&mut buf).unwrap();
        assert_eq!(len, 16);
        assert!(buf.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn full_port_applies_backpressure() {
        let port = MessagePort::new("backpressure", 2);
        port.send(0, 0, b"", TimeValNanos::from_millis(100)).unwrap();
        port.send(0, 1, b"", TimeValNanos::from_millis(100)).unwrap();
        let err = port
            .send(0, 2, b"", TimeValNanos::from_millis(100))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TimedOut);

        let mut buf = [0u8; 0];
        port.receive(&mut buf).unwrap();
        // A slot opened; the retried send goes through.
        port.send(0, 2, b"", TimeValNanos::from_millis(100)).unwrap();
    }

    #[test]
    fn receive_blocks_until_a_sender_arrives() {
        let handle = create_message_port("handoff_port", 4).unwrap();
        let sender = spawn_thread("port_sender", 0, move || {
            crate::sched::snooze(TimeValNanos::from_millis(40));
            send_message(handle, 3, 33, b"ping", TimeValNanos::INFINITE).unwrap();
        })
        .unwrap();

        let mut buf = [0u8; 8];
        let (handler, code, len) =
            receive_message_timeout(handle, &mut buf, TimeValNanos::from_secs(2)).unwrap();
        assert_eq!((handler, code, &buf[..len]), (3, 33, &b"ping"[..]));
        wait_for_thread(sender).unwrap();
        delete_message_port(handle).unwrap();
    }

    #[test]
    fn duplicated_handles_reach_the_same_port() {
        let h1 = create_message_port("dup_port", 4).unwrap();
        let h2 = duplicate_message_port(h1).unwrap();
        send_message(h1, 0, 5, b"x", TimeValNanos::INFINITE).unwrap();
        let mut buf = [0u8; 4];
        let (_, code, _) = receive_message(h2, &mut buf).unwrap();
        assert_eq!(code, 5);
        delete_message_port(h1).unwrap();
        // The port survives until the last handle is gone.
        send_message(h2, 0, 6, b"y", TimeValNanos::INFINITE).unwrap();
        delete_message_port(h2).unwrap();
    }

    #[test]
    fn deleting_an_unknown_handle_fails() {
        assert!(delete_message_port(-1).is_err());
        assert!(delete_message_port(1_000_000).is_err());
    }
}
