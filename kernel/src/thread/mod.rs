// SPDX-License-Identifier: MPL-2.0

//! Kernel threads.
//!
//! A [`ThreadCb`] is a named object holding the thread's identity, state,
//! priority, time accounting and the wait list its joiners park on. Threads
//! are created through [`ThreadOptions`] and reaped by [`wait_for_thread`]
//! (joinable threads) or automatically when their entry returns.

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU8, Ordering};

use crate::config::{THREAD_DEFAULT_STACK_SIZE, THREAD_PRIORITY_MAX, THREAD_PRIORITY_MIN};
use crate::object::{self, free_handle, KernelObject, ObjectMeta, ObjectType, TypedObject};
use crate::prelude::*;
use crate::sched::wait::WaitList;
use crate::time::{self, TimeValNanos};

pub type ThreadId = i32;

/// Note describing the object a thread is parked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingObject {
    pub object_type: ObjectType,
    pub handle: i32,
}

impl BlockingObject {
    pub(crate) fn from_meta(meta: &ObjectMeta) -> BlockingObject {
        BlockingObject {
            object_type: meta.object_type(),
            handle: meta.handle(),
        }
    }
}

/// The scheduling state of a thread.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running = 0,
    Ready = 1,
    Sleeping = 2,
    Waiting = 3,
    Zombie = 4,
    Deleted = 5,
}

impl ThreadState {
    fn from_u8(raw: u8) -> ThreadState {
        match raw {
            0 => ThreadState::Running,
            1 => ThreadState::Ready,
            2 => ThreadState::Sleeping,
            3 => ThreadState::Waiting,
            4 => ThreadState::Zombie,
            _ => ThreadState::Deleted,
        }
    }
}

/// A thread control block.
pub struct ThreadCb {
    meta: ObjectMeta,
    priority: AtomicI32,
    state: AtomicU8,
    joinable: bool,
    restart_syscalls: AtomicBool,
    pending_signals: AtomicU32,
    last_error: AtomicI32,
    start_time: TimeValNanos,
    run_time: SpinLock<i64>,
    /// The object this thread is currently blocked on, for diagnostics.
    blocking_object: SpinLock<Option<BlockingObject>>,
    /// Threads waiting for us to die.
    join_waiters: WaitList,
    #[cfg(not(target_os = "none"))]
    parker: pados_frame::arch::Parker,
    #[cfg(target_os = "none")]
    saved_sp: SpinLock<usize>,
    #[cfg(target_os = "none")]
    wake_token: AtomicBool,
    #[cfg(target_os = "none")]
    _stack: SpinLock<Vec<u8>>,
}

impl ThreadCb {
    fn new(name: &str, priority: i32, joinable: bool, _stack_size: usize) -> ThreadCb {
        ThreadCb {
            meta: ObjectMeta::new(name, ObjectType::Thread),
            priority: AtomicI32::new(priority.clamp(THREAD_PRIORITY_MIN, THREAD_PRIORITY_MAX)),
            state: AtomicU8::new(ThreadState::Ready as u8),
            joinable,
            restart_syscalls: AtomicBool::new(true),
            pending_signals: AtomicU32::new(0),
            last_error: AtomicI32::new(0),
            start_time: time::get_monotonic_time(),
            run_time: SpinLock::new(0),
            blocking_object: SpinLock::new(None),
            join_waiters: WaitList::new(),
            #[cfg(not(target_os = "none"))]
            parker: pados_frame::arch::Parker::new(),
            #[cfg(target_os = "none")]
            saved_sp: SpinLock::new(0),
            #[cfg(target_os = "none")]
            wake_token: AtomicBool::new(false),
            #[cfg(target_os = "none")]
            _stack: SpinLock::new(alloc::vec![0u8; _stack_size]),
        }
    }

    /// The thread's stable id: the handle it was registered under.
    pub fn id(&self) -> ThreadId {
        self.meta.handle()
    }

    pub fn name(&self) -> &str {
        self.meta.name()
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Acquire)
    }

    pub fn set_priority(&self, priority: i32) {
        self.priority.store(
            priority.clamp(THREAD_PRIORITY_MIN, THREAD_PRIORITY_MAX),
            Ordering::Release,
        );
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_joinable(&self) -> bool {
        self.joinable
    }

    /// When the thread came to life.
    pub fn start_time(&self) -> TimeValNanos {
        self.start_time
    }

    /// Accumulated CPU time.
    pub fn run_time(&self) -> TimeValNanos {
        TimeValNanos::from_nanos(*self.run_time.lock())
    }

    pub(crate) fn charge_runtime(&self, slice: TimeValNanos) {
        *self.run_time.lock() += slice.nanos();
    }

    /// Whether waits interrupted by a signal are transparently restarted.
    pub fn restart_syscalls(&self) -> bool {
        self.restart_syscalls.load(Ordering::Acquire)
    }

    pub fn set_restart_syscalls(&self, restart: bool) {
        self.restart_syscalls.store(restart, Ordering::Release);
    }

    pub(crate) fn check_pending_signal(&self) -> Option<Error> {
        if self.pending_signals.load(Ordering::Acquire) == 0 {
            return None;
        }
        Some(if self.restart_syscalls() {
            Error::new(ErrorCode::RestartSyscall)
        } else {
            Error::new(ErrorCode::Interrupted)
        })
    }

    pub(crate) fn set_blocking_object(&self, object: Option<BlockingObject>) {
        *self.blocking_object.lock() = object;
    }

    /// What the thread is blocked on right now, if anything.
    pub fn blocking_object(&self) -> Option<BlockingObject> {
        *self.blocking_object.lock()
    }

    pub(crate) fn join_waiters(&self) -> &WaitList {
        &self.join_waiters
    }

    /// Thread-local `errno` cell backing the C shims.
    pub fn last_error(&self) -> i32 {
        self.last_error.load(Ordering::Acquire)
    }

    pub fn set_last_error(&self, errno: i32) {
        self.last_error.store(errno, Ordering::Release);
    }

    #[cfg(not(target_os = "none"))]
    pub(crate) fn parker(&self) -> &pados_frame::arch::Parker {
        &self.parker
    }

    #[cfg(target_os = "none")]
    pub(crate) fn take_wake_token(&self) -> bool {
        self.wake_token.swap(false, Ordering::AcqRel)
    }

    #[cfg(target_os = "none")]
    pub(crate) fn set_wake_token(&self) {
        self.wake_token.store(true, Ordering::Release);
    }

    #[cfg(target_os = "none")]
    pub(crate) fn save_stack_pointer(&self, sp: usize) {
        *self.saved_sp.lock() = sp;
    }

    #[cfg(target_os = "none")]
    pub(crate) fn saved_stack_pointer(&self) -> usize {
        *self.saved_sp.lock()
    }
}

impl KernelObject for ThreadCb {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// Threads are waitable: they fire when they exit.
impl crate::sched::wait::WaitableObject for ThreadCb {
    fn add_listener(
        &self,
        node: &Arc<crate::sched::wait::WaitNode>,
        _mode: crate::sched::wait::WaitMode,
    ) {
        self.join_waiters.append(node);
    }

    fn remove_listener(
        &self,
        node: &Arc<crate::sched::wait::WaitNode>,
        _mode: crate::sched::wait::WaitMode,
    ) {
        self.join_waiters.remove(node);
    }
}

impl TypedObject for ThreadCb {
    const TYPE: ObjectType = ObjectType::Thread;
}

impl Debug for ThreadCb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadCb")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("priority", &self.priority())
            .finish()
    }
}

impl Drop for ThreadCb {
    fn drop(&mut self) {
        self.join_waiters.wake_all_target_deleted();
    }
}

/// Options for spawning a thread.
pub struct ThreadOptions {
    name: String,
    priority: i32,
    joinable: bool,
    stack_size: usize,
}

impl ThreadOptions {
    pub fn new(name: &str) -> Self {
        ThreadOptions {
            name: name.to_string(),
            priority: 0,
            joinable: true,
            stack_size: THREAD_DEFAULT_STACK_SIZE,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn joinable(mut self, joinable: bool) -> Self {
        self.joinable = joinable;
        self
    }

    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Create the thread and make it ready. Returns its handle.
    pub fn spawn<F>(self, entry: F) -> Result<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        let cb = Arc::new(ThreadCb::new(
            &self.name,
            self.priority,
            self.joinable,
            self.stack_size,
        ));
        let handle = object::register_object(cb.clone())?;
        spawn_arch(cb, self.stack_size, Box::new(entry)).map_err(|e| {
            let _ = free_handle(handle);
            e
        })?;
        Ok(handle)
    }
}

/// Spawn a thread with default options.
pub fn spawn_thread<F>(name: &str, priority: i32, entry: F) -> Result<ThreadId>
where
    F: FnOnce() + Send + 'static,
{
    ThreadOptions::new(name).priority(priority).spawn(entry)
}

fn exit_current_thread(cb: &Arc<ThreadCb>) {
    cb.set_state(ThreadState::Zombie);
    cb.join_waiters().wake_all();
    if !cb.is_joinable() {
        // Nobody will reap us; release the handle now.
        cb.set_state(ThreadState::Deleted);
        let _ = free_handle(cb.id());
    }
}

/// Wait until the thread behind `handle` exits, then reap it.
pub fn wait_for_thread(handle: ThreadId) -> Result<()> {
    let thread =
        object::get_object::<ThreadCb>(handle).ok_or(Error::new(ErrorCode::NotFound))?;
    if !thread.is_joinable() {
        return Err(Error::with_message(
            ErrorCode::InvalidArgument,
            "thread is not joinable",
        ));
    }
    let node = crate::sched::wait::WaitNode::new_for_current_thread();
    loop {
        thread.join_waiters().append(&node);
        if matches!(thread.state(), ThreadState::Zombie | ThreadState::Deleted) {
            thread.join_waiters().remove(&node);
            break;
        }
        if let Err(err) = node.wait(None, true) {
            if err.code() == ErrorCode::BadState {
                // The thread went away while we were parked: it has exited.
                break;
            }
            thread.join_waiters().cancel_wait(&node);
            return Err(err);
        }
    }
    thread.set_state(ThreadState::Deleted);
    match free_handle(handle) {
        Ok(()) => Ok(()),
        // Another joiner got there first.
        Err(_) => Ok(()),
    }
}

/// Deliver `signal` (1-31) to a thread. A thread parked in an interruptible
/// wait wakes with `Interrupted` (or restarts, if enabled).
pub fn send_thread_signal(handle: ThreadId, signal: u32) -> Result<()> {
    if !(1..32).contains(&signal) {
        return Err(Error::new(ErrorCode::InvalidArgument));
    }
    let thread =
        object::get_object::<ThreadCb>(handle).ok_or(Error::new(ErrorCode::NotFound))?;
    thread
        .pending_signals
        .fetch_or(1 << signal, Ordering::AcqRel);
    crate::sched::park::unpark(&thread);
    Ok(())
}

/// Take and dispatch the pending signals of the calling thread. Called
/// between restart iterations of interrupted syscalls.
pub fn force_process_signals() {
    let current = current_thread();
    current.pending_signals.swap(0, Ordering::AcqRel);
}

/// `errno` shims for the C library layer.
pub fn get_last_error() -> i32 {
    current_thread().last_error()
}

pub fn set_last_error(errno: i32) {
    current_thread().set_last_error(errno);
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        use pados_frame::arch;

        static CURRENT_THREAD: SpinLock<Option<Arc<ThreadCb>>> = SpinLock::new(None);
        static IDLE_THREAD: SpinLock<Option<Arc<ThreadCb>>> = SpinLock::new(None);

        pub fn try_current_thread() -> Option<Arc<ThreadCb>> {
            CURRENT_THREAD.lock_irq_disabled().clone()
        }

        /// The running thread's control block.
        pub fn current_thread() -> Arc<ThreadCb> {
            try_current_thread().expect("scheduler not started")
        }

        pub(crate) fn take_current_thread() -> Option<Arc<ThreadCb>> {
            CURRENT_THREAD.lock_irq_disabled().take()
        }

        pub(crate) fn set_current_thread(thread: Arc<ThreadCb>) {
            *CURRENT_THREAD.lock_irq_disabled() = Some(thread);
        }

        pub(crate) fn idle_thread() -> Arc<ThreadCb> {
            IDLE_THREAD
                .lock_irq_disabled()
                .clone()
                .expect("idle thread not initialized")
        }

        pub(crate) fn init_idle_thread() {
            let idle = Arc::new(ThreadCb::new("idle", THREAD_PRIORITY_MIN, false, 0));
            idle.set_state(ThreadState::Running);
            let _ = object::register_object(idle.clone());
            *IDLE_THREAD.lock_irq_disabled() = Some(idle.clone());
            set_current_thread(idle);
        }

        struct ThreadEntry {
            cb: Arc<ThreadCb>,
            entry: Box<dyn FnOnce() + Send + 'static>,
        }

        extern "C" fn thread_trampoline(arg: usize) {
            // Reconstitute the entry packet prepared by `spawn_arch`.
            let packet = unsafe { Box::from_raw(arg as *mut ThreadEntry) };
            let cb = packet.cb.clone();
            (packet.entry)();
            exit_current_thread(&cb);
            arch::trigger_reschedule();
            unreachable!("dead thread rescheduled");
        }

        fn spawn_arch(
            cb: Arc<ThreadCb>,
            _stack_size: usize,
            entry: Box<dyn FnOnce() + Send + 'static>,
        ) -> Result<()> {
            let packet = Box::new(ThreadEntry { cb: cb.clone(), entry });
            let arg = Box::into_raw(packet) as usize;
            {
                let mut stack = cb._stack.lock();
                let top = unsafe { stack.as_mut_ptr().add(stack.len()) as *mut usize };
                let ctx = unsafe {
                    arch::init_task_stack(top, thread_trampoline as usize, arg)
                };
                *cb.saved_sp.lock() = ctx.sp;
            }
            cb.set_state(ThreadState::Ready);
            crate::sched::queues::run_queue_enqueue(cb);
            Ok(())
        }
    } else {
        use core::cell::RefCell;

        std::thread_local! {
            static CURRENT_THREAD: RefCell<Option<Arc<ThreadCb>>> =
                const { RefCell::new(None) };
        }

        pub fn try_current_thread() -> Option<Arc<ThreadCb>> {
            CURRENT_THREAD.with(|current| current.borrow().clone())
        }

        /// The running thread's control block. Host threads that were not
        /// spawned by the kernel are adopted on first use.
        pub fn current_thread() -> Arc<ThreadCb> {
            if let Some(current) = try_current_thread() {
                return current;
            }
            let name = std::thread::current()
                .name()
                .unwrap_or("external")
                .to_string();
            let cb = Arc::new(ThreadCb::new(&name, 0, false, 0));
            cb.set_state(ThreadState::Running);
            let _ = object::register_object(cb.clone());
            CURRENT_THREAD.with(|current| *current.borrow_mut() = Some(cb.clone()));
            cb
        }

        fn spawn_arch(
            cb: Arc<ThreadCb>,
            stack_size: usize,
            entry: Box<dyn FnOnce() + Send + 'static>,
        ) -> Result<()> {
            let name = cb.name().to_string();
            let body = Box::new(move || {
                cb.set_state(ThreadState::Running);
                CURRENT_THREAD.with(|current| *current.borrow_mut() = Some(cb.clone()));
                entry();
                exit_current_thread(&cb);
            });
            pados_frame::arch::spawn_thread(&name, stack_size, body)
                .map_err(|_| Error::with_message(ErrorCode::OutOfMemory, "thread spawn failed"))
        }
    }
}

/// The calling thread's id.
pub fn current_thread_id() -> ThreadId {
    current_thread().id()
}

#[cfg(test)]
pub(crate) fn test_thread(priority: i32) -> Arc<ThreadCb> {
    Arc::new(ThreadCb::new("test_thread", priority, false, 0))
}
