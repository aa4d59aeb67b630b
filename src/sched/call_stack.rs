//! Thread-local reentrancy registry.
//!
//! Each worker thread that enters a scheduler's run loop pushes a frame
//! here: the scheduler's identity plus a handle to the run's thread-private
//! operation queue. `post` and `dispatch` consult the registry to answer
//! "is this thread currently inside scheduler S?" in O(chain depth), where
//! the chain is almost always of length one.
//!
//! Frames are strictly scoped to the run that created them: the RAII
//! [`CallStackEntry`] removes its frame on drop, so entries can never
//! outlive their run context, even on unwind.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::op::queue::OpQueue;

/// Handle to a run's thread-private operation queue.
///
/// `Rc` because the handle is shared between the run context on the stack
/// and the registry frame; it never leaves its thread.
pub(crate) type PrivateQueue = Rc<RefCell<OpQueue>>;

struct Frame {
    key: usize,
    token: u64,
    queue: PrivateQueue,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
    static NEXT_TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// Scoped registration of a (scheduler, private queue) pair on this thread.
///
/// Frames are usually removed in LIFO order, but removal is by identity
/// token so an out-of-order drop cannot evict another run's frame.
pub(crate) struct CallStackEntry {
    token: u64,
}

impl CallStackEntry {
    /// Registers `queue` as the innermost private queue for the scheduler
    /// identified by `key` on the current thread.
    pub(crate) fn push(key: usize, queue: PrivateQueue) -> Self {
        let token = NEXT_TOKEN.with(|next| {
            let token = next.get();
            next.set(token.wrapping_add(1));
            token
        });
        FRAMES.with(|frames| {
            frames.borrow_mut().push(Frame { key, token, queue });
        });
        Self { token }
    }
}

impl Drop for CallStackEntry {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            if let Some(index) = frames.iter().rposition(|f| f.token == self.token) {
                frames.remove(index);
            }
        });
    }
}

/// Returns the innermost private queue registered for `key` on the current
/// thread, or `None` if this thread is not inside that scheduler.
pub(crate) fn top_queue(key: usize) -> Option<PrivateQueue> {
    FRAMES.with(|frames| {
        frames
            .borrow()
            .iter()
            .rev()
            .find(|f| f.key == key)
            .map(|f| Rc::clone(&f.queue))
    })
}

/// Returns true if the current thread is inside the scheduler identified by
/// `key`.
pub(crate) fn is_inside(key: usize) -> bool {
    FRAMES.with(|frames| frames.borrow().iter().any(|f| f.key == key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_queue() -> PrivateQueue {
        Rc::new(RefCell::new(OpQueue::new()))
    }

    #[test]
    fn lookup_misses_when_not_registered() {
        assert!(top_queue(0xDEAD).is_none());
        assert!(!is_inside(0xDEAD));
    }

    #[test]
    fn entry_scopes_registration() {
        let key = 0x1000;
        {
            let _entry = CallStackEntry::push(key, fresh_queue());
            assert!(is_inside(key));
            assert!(top_queue(key).is_some());
        }
        assert!(!is_inside(key), "frame must be removed on drop");
    }

    #[test]
    fn innermost_frame_wins() {
        let key = 0x2000;
        let outer = fresh_queue();
        let inner = fresh_queue();

        let _outer_entry = CallStackEntry::push(key, Rc::clone(&outer));
        {
            let _inner_entry = CallStackEntry::push(key, Rc::clone(&inner));
            let found = top_queue(key).expect("registered");
            assert!(Rc::ptr_eq(&found, &inner), "lookup must see innermost");
        }
        let found = top_queue(key).expect("outer still registered");
        assert!(Rc::ptr_eq(&found, &outer));
    }

    #[test]
    fn distinct_keys_do_not_alias() {
        let _a = CallStackEntry::push(0x3000, fresh_queue());
        let _b = CallStackEntry::push(0x4000, fresh_queue());

        assert!(is_inside(0x3000));
        assert!(is_inside(0x4000));
        assert!(!is_inside(0x5000));
    }

    #[test]
    fn out_of_order_drop_removes_the_right_frame() {
        let key = 0x6000;
        let first = fresh_queue();
        let second = fresh_queue();

        let entry_first = CallStackEntry::push(key, Rc::clone(&first));
        let entry_second = CallStackEntry::push(key, Rc::clone(&second));

        drop(entry_first);
        let found = top_queue(key).expect("second frame survives");
        assert!(Rc::ptr_eq(&found, &second));
        drop(entry_second);
        assert!(!is_inside(key));
    }

    #[test]
    fn registration_is_thread_local() {
        let key = 0x7000;
        let _entry = CallStackEntry::push(key, fresh_queue());

        let seen_elsewhere = std::thread::spawn(move || is_inside(key))
            .join()
            .expect("probe thread");
        assert!(!seen_elsewhere, "frames must not leak across threads");
    }
}
