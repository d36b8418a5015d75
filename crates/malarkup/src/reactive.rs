//! Fine-grained reactivity: signals, effects and derived signals.
//!
//! Dependency capture uses a thread-local stack of frames. While an effect
//! runs, its frame is on top of the stack and every signal read subscribes it.
//! Nested effects push their own frame, so an inner effect never steals the
//! reads of the outer one. Subscriptions are permanent until the effect is
//! disposed or explicitly unsubscribed from a signal.
//!
//! Propagation is synchronous and unbatched: `Signal::set` runs every current
//! subscriber exactly once before it returns.

use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

thread_local! {
    static FRAMES: RefCell<Vec<Option<Effect>>> = const { RefCell::new(Vec::new()) };
    static NEXT_EFFECT_ID: Cell<u64> = const { Cell::new(0) };
}

/// Pops its capture frame when dropped, also when the tracked closure panics.
struct Frame;

impl Frame {
    fn push(effect: Option<Effect>) -> Self {
        FRAMES.with(|frames| frames.borrow_mut().push(effect));
        Frame
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

fn current_effect() -> Option<Effect> {
    FRAMES.with(|frames| frames.borrow().last().cloned().flatten())
}

trait Source {
    fn remove_subscriber(&self, id: EffectId) -> bool;
}

struct EffectInner {
    id: EffectId,
    run: RefCell<Box<dyn FnMut()>>,
    sources: RefCell<Vec<Weak<dyn Source>>>,
    disposed: Cell<bool>,
}

/// Handle to a registered effect.
///
/// Signals keep their subscribers alive, so dropping the handle does not stop
/// the effect. Use [`Effect::dispose`] for teardown.
#[derive(Clone)]
pub struct Effect(Rc<EffectInner>);

impl Effect {
    fn new(run: impl FnMut() + 'static) -> Self {
        let id = NEXT_EFFECT_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            EffectId(id)
        });
        Self(Rc::new(EffectInner {
            id,
            run: RefCell::new(Box::new(run)),
            sources: RefCell::default(),
            disposed: Cell::new(false),
        }))
    }

    pub fn id(&self) -> EffectId {
        self.0.id
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    /// Runs the effect body with this effect as the capturing frame.
    pub fn run(&self) {
        if self.is_disposed() {
            return;
        }
        let Ok(mut run) = self.0.run.try_borrow_mut() else {
            log::trace!("effect {:?} is already running, skipping nested run", self.0.id);
            return;
        };
        let _frame = Frame::push(Some(self.clone()));
        (*run)();
    }

    /// Runs `f` with this effect as the capturing frame, without running the
    /// effect body. Signals read by `f` re-run the effect when written.
    pub fn track<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = Frame::push(Some(self.clone()));
        f()
    }

    /// Number of live signals this effect is subscribed to.
    pub fn dependency_count(&self) -> usize {
        self.0
            .sources
            .borrow()
            .iter()
            .filter(|source| source.strong_count() > 0)
            .count()
    }

    pub fn downgrade(&self) -> WeakEffect {
        WeakEffect(Rc::downgrade(&self.0))
    }

    /// Unsubscribes from every signal read so far and stops future runs.
    pub fn dispose(&self) {
        self.0.disposed.set(true);
        let sources = std::mem::take(&mut *self.0.sources.borrow_mut());
        for source in sources {
            if let Some(source) = source.upgrade() {
                source.remove_subscriber(self.0.id);
            }
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.0.id)
            .field("disposed", &self.0.disposed.get())
            .finish()
    }
}

/// Handle that does not keep the effect alive.
#[derive(Clone)]
pub struct WeakEffect(Weak<EffectInner>);

impl WeakEffect {
    /// The effect, unless it was dropped or disposed.
    pub fn upgrade(&self) -> Option<Effect> {
        self.0
            .upgrade()
            .map(Effect)
            .filter(|effect| !effect.is_disposed())
    }
}

impl fmt::Debug for WeakEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakEffect").field(&self.upgrade()).finish()
    }
}

struct SignalInner<T> {
    value: RefCell<T>,
    subscribers: RefCell<IndexMap<EffectId, Effect>>,
}

impl<T> Source for SignalInner<T> {
    fn remove_subscriber(&self, id: EffectId) -> bool {
        self.subscribers.borrow_mut().shift_remove(&id).is_some()
    }
}

/// A reactive mutable cell.
pub struct Signal<T>(Rc<SignalInner<T>>);

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(SignalInner {
            value: RefCell::new(value),
            subscribers: RefCell::default(),
        }))
    }

    fn track(&self) {
        let Some(effect) = current_effect() else {
            return;
        };
        if effect.is_disposed() {
            return;
        }
        let inserted = {
            let mut subscribers = self.0.subscribers.borrow_mut();
            if subscribers.contains_key(&effect.id()) {
                false
            } else {
                subscribers.insert(effect.id(), effect.clone());
                true
            }
        };
        if inserted {
            let source: Weak<SignalInner<T>> = Rc::downgrade(&self.0);
            let source: Weak<dyn Source> = source;
            effect.0.sources.borrow_mut().push(source);
        }
    }

    /// Reads the value and subscribes the running effect, if any.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.0.value.borrow().clone()
    }

    /// Tracked read through a borrow.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.0.value.borrow())
    }

    /// Reads the value without subscribing.
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.0.value.borrow().clone()
    }

    pub fn set(&self, value: T) {
        *self.0.value.borrow_mut() = value;
        self.notify();
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.0.value.borrow_mut());
        self.notify();
    }

    fn notify(&self) {
        let subscribers: Vec<Effect> = self.0.subscribers.borrow().values().cloned().collect();
        for subscriber in subscribers {
            subscriber.run();
        }
    }

    pub fn unsubscribe(&self, effect: &Effect) -> bool {
        self.0.remove_subscriber(effect.id())
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.subscribers.borrow().len()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("value", &self.0.value.borrow())
            .field("subscribers", &self.0.subscribers.borrow().len())
            .finish()
    }
}

pub fn signal<T: 'static>(value: T) -> Signal<T> {
    Signal::new(value)
}

/// Registers `run` and invokes it immediately; it re-runs after every write to
/// a signal it has read.
pub fn effect(run: impl FnMut() + 'static) -> Effect {
    let effect = Effect::new(run);
    effect.run();
    effect
}

/// Registers `run` without invoking it. Until its first run the effect only
/// depends on what [`Effect::track`] reads on its behalf.
pub fn lazy_effect(run: impl FnMut() + 'static) -> Effect {
    Effect::new(run)
}

/// A signal recomputed by an effect wrapping `producer`.
///
/// Starts at `T::default()` and holds the first computed value before this
/// function returns.
pub fn derived<T: Default + 'static>(mut producer: impl FnMut() -> T + 'static) -> Signal<T> {
    let signal = Signal::new(T::default());
    let target = signal.clone();
    effect(move || target.set(producer()));
    signal
}

/// Runs `f` with dependency capture suspended.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _frame = Frame::push(None);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Rc<Cell<usize>>, impl Fn() -> usize) {
        let runs = Rc::new(Cell::new(0));
        let read = {
            let runs = runs.clone();
            move || runs.get()
        };
        (runs, read)
    }

    #[test]
    fn effect_runs_immediately_and_once_per_write() {
        let count = signal(0);
        let (runs, read_runs) = counter();
        effect({
            let count = count.clone();
            move || {
                count.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(read_runs(), 1);
        count.set(1);
        count.set(1);
        count.set(2);
        assert_eq!(read_runs(), 4);
    }

    #[test]
    fn every_subscriber_runs_once_per_write() {
        let count = signal(0);
        let (first_runs, read_first) = counter();
        let (second_runs, read_second) = counter();
        for runs in [first_runs, second_runs] {
            let count = count.clone();
            effect(move || {
                count.get();
                runs.set(runs.get() + 1);
            });
        }
        assert_eq!(count.subscriber_count(), 2);
        count.set(1);
        assert_eq!((read_first(), read_second()), (2, 2));
        count.set(2);
        assert_eq!((read_first(), read_second()), (3, 3));
    }

    #[test]
    fn lazy_effects_run_only_after_a_tracked_write() {
        let count = signal(0);
        let (runs, read_runs) = counter();
        let watcher = lazy_effect({
            let count = count.clone();
            move || {
                count.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(read_runs(), 0);
        assert_eq!(watcher.dependency_count(), 0);
        assert_eq!(watcher.track(|| count.get()), 0);
        assert_eq!(watcher.dependency_count(), 1);
        assert_eq!(read_runs(), 0);
        count.set(1);
        assert_eq!(read_runs(), 1);
    }

    #[test]
    fn weak_handles_forget_disposed_and_dropped_effects() {
        let count = signal(0);
        let handle = effect({
            let count = count.clone();
            move || {
                count.get();
            }
        });
        let weak = handle.downgrade();
        assert!(weak.upgrade().is_some());
        handle.dispose();
        assert!(weak.upgrade().is_none());

        let unsubscribed = effect(|| {}).downgrade();
        assert!(unsubscribed.upgrade().is_none());
    }

    #[test]
    fn reading_twice_subscribes_once() {
        let count = signal(1);
        let (runs, read_runs) = counter();
        effect({
            let count = count.clone();
            move || {
                let _ = count.get() + count.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(count.subscriber_count(), 1);
        count.set(2);
        assert_eq!(read_runs(), 2);
    }

    #[test]
    fn reads_after_the_first_are_still_captured() {
        let a = signal(1);
        let b = signal(1);
        let (runs, read_runs) = counter();
        effect({
            let (a, b) = (a.clone(), b.clone());
            move || {
                a.get();
                b.get();
                runs.set(runs.get() + 1);
            }
        });
        b.set(2);
        a.set(2);
        assert_eq!(read_runs(), 3);
    }

    #[test]
    fn nested_effects_keep_their_own_dependencies() {
        let outer_source = signal(0);
        let inner_source = signal(0);
        let late_source = signal(0);
        let (outer_runs, read_outer) = counter();
        effect({
            let (outer_source, inner_source, late_source) =
                (outer_source.clone(), inner_source.clone(), late_source.clone());
            move || {
                outer_source.get();
                let inner_source = inner_source.clone();
                effect(move || {
                    inner_source.get();
                });
                late_source.get();
                outer_runs.set(outer_runs.get() + 1);
            }
        });
        inner_source.set(1);
        assert_eq!(read_outer(), 1);
        late_source.set(1);
        assert_eq!(read_outer(), 2);
        assert_eq!(outer_source.subscriber_count(), 1);
    }

    #[test]
    fn derived_holds_value_at_creation_and_recomputes() {
        let x = signal(3.0);
        let doubled = derived({
            let x = x.clone();
            move || x.get() * 2.0
        });
        assert_eq!(doubled.peek(), 6.0);
        x.set(5.0);
        assert_eq!(doubled.peek(), 10.0);
    }

    #[test]
    fn unsubscribe_and_dispose_stop_reruns() {
        let a = signal(0);
        let b = signal(0);
        let (runs, read_runs) = counter();
        let handle = effect({
            let (a, b) = (a.clone(), b.clone());
            move || {
                a.get();
                b.get();
                runs.set(runs.get() + 1);
            }
        });
        assert!(a.unsubscribe(&handle));
        a.set(1);
        assert_eq!(read_runs(), 1);
        handle.dispose();
        b.set(1);
        assert_eq!(read_runs(), 1);
        assert_eq!(b.subscriber_count(), 0);
    }

    #[test]
    fn untracked_reads_do_not_subscribe() {
        let a = signal(0);
        effect({
            let a = a.clone();
            move || {
                untracked(|| a.get());
            }
        });
        assert_eq!(a.subscriber_count(), 0);
    }

    #[test]
    fn writes_inside_a_running_effect_do_not_recurse() {
        let a = signal(0);
        effect({
            let a = a.clone();
            move || {
                let value = a.get();
                if value < 3 {
                    a.set(value + 1);
                }
            }
        });
        assert_eq!(a.peek(), 1);
    }

    #[test]
    fn nested_propagation_completes_before_write_returns() {
        let source = signal(0);
        let middle = signal(0);
        let seen = Rc::new(Cell::new(0));
        effect({
            let (source, middle) = (source.clone(), middle.clone());
            move || middle.set(source.get() * 10)
        });
        effect({
            let (middle, seen) = (middle.clone(), seen.clone());
            move || seen.set(middle.get())
        });
        source.set(4);
        assert_eq!(seen.get(), 40);
    }
}
