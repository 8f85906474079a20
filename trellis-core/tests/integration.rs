//! Integration Tests for Reactive System
//!
//! These tests verify that signals, computeds, effects, batches and scopes
//! work together correctly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use trellis_core::reactive::{
    batch, computed, effect, liveness, on_cleanup, on_mount, pop_scope, push_scope, run_cleanups,
    signal, try_batch, untrack, watch, Cleanup, Runtime, RuntimeGuard,
};
use trellis_core::{Error, RuntimeConfig};

/// Fresh runtime per test, with log output routed through the test harness.
fn isolated() -> (Runtime, RuntimeGuard) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let runtime = Runtime::default();
    let guard = runtime.enter();
    (runtime, guard)
}

fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
    let count = Rc::new(Cell::new(0));
    (count.clone(), count)
}

/// Writing the same value never re-runs; a new value runs exactly once.
#[test]
fn equal_write_is_a_noop() {
    let (_rt, _g) = isolated();
    let s = signal(0);
    let (n, runs) = counter();

    let _e = {
        let s = s.clone();
        effect(move || {
            s.get();
            runs.set(runs.get() + 1);
        })
    };
    assert_eq!(n.get(), 1);

    s.set(0);
    assert_eq!(n.get(), 1);

    s.set(1);
    assert_eq!(n.get(), 2);
}

/// S -> A, S -> B, E reads A and B: one write, one run.
#[test]
fn diamond_runs_effect_once() {
    let (_rt, _g) = isolated();
    let s = signal(1);
    let a = {
        let s = s.clone();
        computed(move || s.get() + 1)
    };
    let b = {
        let s = s.clone();
        computed(move || s.get() * 10)
    };
    let seen = Rc::new(RefCell::new(Vec::new()));

    let _e = {
        let (a, b, seen) = (a.clone(), b.clone(), seen.clone());
        effect(move || seen.borrow_mut().push((a.get(), b.get())))
    };

    s.set(2);
    assert_eq!(*seen.borrow(), vec![(2, 10), (3, 20)]);
}

/// The effect also reads S directly: still one run, and it sees fresh
/// computed values rather than a mix of old and new.
#[test]
fn diamond_with_direct_edge_is_glitch_free() {
    let (_rt, _g) = isolated();
    let s = signal(1);
    let doubled = {
        let s = s.clone();
        computed(move || s.get() * 2)
    };
    let seen = Rc::new(RefCell::new(Vec::new()));

    let _e = {
        let (s, doubled, seen) = (s.clone(), doubled.clone(), seen.clone());
        effect(move || seen.borrow_mut().push((s.get(), doubled.get())))
    };

    s.set(5);
    assert_eq!(*seen.borrow(), vec![(1, 2), (5, 10)]);
}

#[test]
fn batch_coalesces_writes() {
    let (_rt, _g) = isolated();
    let first = signal("a");
    let second = signal("b");
    let (n, runs) = counter();

    let _e = {
        let (first, second) = (first.clone(), second.clone());
        effect(move || {
            first.get();
            second.get();
            runs.set(runs.get() + 1);
        })
    };

    first.set("c");
    second.set("d");
    assert_eq!(n.get(), 3);

    batch(|| {
        first.set("e");
        second.set("f");
        assert_eq!(n.get(), 3);
    });
    assert_eq!(n.get(), 4);
}

#[test]
fn nested_batches_share_one_flush() {
    let (rt, _g) = isolated();
    let s = signal(0);
    let (n, runs) = counter();
    let _e = {
        let s = s.clone();
        effect(move || {
            s.get();
            runs.set(runs.get() + 1);
        })
    };

    let value = batch(|| {
        s.set(1);
        batch(|| s.set(2));
        assert_eq!(n.get(), 1);
        assert_eq!(rt.pending_count(), 1);
        s.set(3);
        "done"
    });

    assert_eq!(value, "done");
    assert_eq!(n.get(), 2);
    assert_eq!(rt.pending_count(), 0);
}

#[test]
fn batch_reverting_a_value_still_settles() {
    let (_rt, _g) = isolated();
    let s = signal(1);
    let parity = {
        let s = s.clone();
        computed(move || s.get() % 2)
    };
    let (n, runs) = counter();
    let _e = {
        let parity = parity.clone();
        effect(move || {
            parity.get();
            runs.set(runs.get() + 1);
        })
    };

    // The computed comes out unchanged, so the effect settles without running.
    batch(|| {
        s.set(2);
        s.set(3);
    });
    assert_eq!(n.get(), 1);
}

#[test]
fn cleanups_run_lifo() {
    let (_rt, _g) = isolated();
    let order = Rc::new(RefCell::new(Vec::new()));

    let scope = push_scope();
    for i in 1..=3 {
        let order = order.clone();
        on_cleanup(move || order.borrow_mut().push(i));
    }
    pop_scope();

    run_cleanups(&scope);
    assert_eq!(*order.borrow(), vec![3, 2, 1]);
}

/// A watch cleanup from run N runs before run N+1 and again on disposal.
#[test]
fn watch_cleanup_precedes_next_run() {
    let (_rt, _g) = isolated();
    let s = signal(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    let scope = push_scope();
    {
        let (s, log) = (s.clone(), log.clone());
        watch(move || s.get(), move |v| {
            log.borrow_mut().push(format!("run {v}"));
            let log = log.clone();
            on_cleanup(move || log.borrow_mut().push(format!("cleanup {v}")));
        });
    }
    pop_scope();

    s.set(1);
    s.set(2);
    run_cleanups(&scope);

    assert_eq!(
        *log.borrow(),
        vec![
            "run 0",
            "cleanup 0",
            "run 1",
            "cleanup 1",
            "run 2",
            "cleanup 2"
        ]
    );

    s.set(3);
    assert_eq!(log.borrow().len(), 6);
}

#[test]
fn untracked_read_does_not_subscribe() {
    let (_rt, _g) = isolated();
    let tracked = signal(0);
    let ignored = signal(0);
    let (n, runs) = counter();

    let _e = {
        let (tracked, ignored) = (tracked.clone(), ignored.clone());
        effect(move || {
            tracked.get();
            untrack(|| ignored.get());
            runs.set(runs.get() + 1);
        })
    };

    ignored.set(1);
    assert_eq!(n.get(), 1);
    assert_eq!(ignored.subscriber_count(), 0);

    tracked.set(1);
    assert_eq!(n.get(), 2);
}

#[test]
fn computed_is_cached_until_source_changes() {
    let (_rt, _g) = isolated();
    let s = signal(2);
    let (calls, c_calls) = counter();
    let c = {
        let s = s.clone();
        computed(move || {
            c_calls.set(c_calls.get() + 1);
            s.get() * 2
        })
    };

    assert_eq!(c.get(), 4);
    assert_eq!(c.get(), 4);
    assert_eq!(calls.get(), 1);

    s.set(3);
    assert_eq!(calls.get(), 1);
    assert_eq!(c.get(), 6);
    assert_eq!(calls.get(), 2);
}

#[test]
fn effect_switching_branches_resubscribes() {
    let (_rt, _g) = isolated();
    let use_left = signal(true);
    let left = signal(1);
    let right = signal(2);
    let (n, runs) = counter();

    let _e = {
        let (use_left, left, right) = (use_left.clone(), left.clone(), right.clone());
        effect(move || {
            if use_left.get() {
                left.get();
            } else {
                right.get();
            }
            runs.set(runs.get() + 1);
        })
    };

    right.set(3);
    assert_eq!(n.get(), 1);

    use_left.set(false);
    assert_eq!(n.get(), 2);

    left.set(4);
    assert_eq!(n.get(), 2);
    assert_eq!(left.subscriber_count(), 0);

    right.set(5);
    assert_eq!(n.get(), 3);
}

#[test]
fn disposing_scope_cascades_through_mounts_and_effects() {
    let (_rt, _g) = isolated();
    let s = signal(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    let root = push_scope();
    {
        let (s, log) = (s.clone(), log.clone());
        on_mount(move || {
            let effect_log = log.clone();
            effect(move || {
                s.get();
                let log = effect_log.clone();
                on_cleanup(move || log.borrow_mut().push("effect cleanup"));
            });
            let log = log.clone();
            Box::new(move || log.borrow_mut().push("mount cleanup")) as Cleanup
        });
    }
    pop_scope();

    root.dispose();
    assert_eq!(*log.borrow(), vec!["mount cleanup", "effect cleanup"]);
    assert_eq!(s.subscriber_count(), 0);
}

#[test]
fn on_mount_callback_is_untracked_and_runs_once() {
    let (_rt, _g) = isolated();
    let s = signal(0);
    let (n, runs) = counter();

    let root = push_scope();
    {
        let s = s.clone();
        on_mount(move || {
            s.get();
            runs.set(runs.get() + 1);
        });
    }
    pop_scope();

    s.set(1);
    assert_eq!(n.get(), 1);
    assert_eq!(s.subscriber_count(), 0);
    root.dispose();
}

#[test]
fn effect_panic_propagates_and_keeps_cleanups() {
    let (rt, _g) = isolated();
    let s = signal(0);
    let cleaned = Rc::new(Cell::new(false));

    let handle = {
        let (s, cleaned) = (s.clone(), cleaned.clone());
        effect(move || {
            let v = s.get();
            let cleaned = cleaned.clone();
            on_cleanup(move || cleaned.set(true));
            assert!(v != 1, "effect rejects one");
        })
    };

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| s.set(1)));
    assert!(result.is_err());
    assert!(cleaned.get(), "previous run's cleanup ran before the failing run");
    assert!(!rt.is_batching());

    cleaned.set(false);
    handle.dispose();
    assert!(cleaned.get(), "failing run's cleanup survives until disposal");
}

#[test]
fn panicking_effect_does_not_starve_later_effects() {
    let (_rt, _g) = isolated();
    let s = signal(0);
    let (n, runs) = counter();

    let _bad = {
        let s = s.clone();
        effect(move || assert!(s.get() != 1, "bad effect"))
    };
    let _good = {
        let s = s.clone();
        effect(move || {
            s.get();
            runs.set(runs.get() + 1);
        })
    };

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| s.set(1)));
    assert!(result.is_err());
    assert_eq!(n.get(), 1);

    // The skipped effect stayed queued and runs with the next flush.
    s.set(2);
    assert_eq!(n.get(), 2);
}

#[test]
fn ping_pong_effects_hit_flush_limit() {
    let runtime = Runtime::new(RuntimeConfig {
        max_flush_rounds: 5,
        ..RuntimeConfig::default()
    });
    let _g = runtime.enter();
    let a = signal(0);
    let b = signal(0);

    // Both settle at zero; any positive write bounces between them forever.
    let _e1 = {
        let (a, b) = (a.clone(), b.clone());
        effect(move || {
            let v = a.get();
            if v > 0 {
                b.set(v + 1);
            }
        })
    };
    let _e2 = {
        let (a, b) = (a.clone(), b.clone());
        effect(move || {
            let v = b.get();
            if v > 0 {
                a.set(v + 1);
            }
        })
    };

    let err = a.try_set(1).unwrap_err();
    assert!(matches!(err, Error::FlushLimitExceeded { rounds: 5 }));
    assert_eq!(runtime.pending_count(), 0);
}

#[test]
fn try_batch_reports_flush_failure() {
    let runtime = Runtime::new(RuntimeConfig {
        max_flush_rounds: 3,
        ..RuntimeConfig::default()
    });
    let _g = runtime.enter();
    let s = signal(0u64);

    let _e = {
        let s = s.clone();
        effect(move || {
            let v = s.get();
            if v > 0 {
                s.set(v + 1);
            }
        })
    };

    let result = try_batch(|| s.set(1));
    assert!(matches!(result, Err(Error::FlushLimitExceeded { .. })));
}

#[test]
fn deep_computed_chain_respects_depth_limit() {
    let runtime = Runtime::new(RuntimeConfig {
        max_update_depth: 8,
        ..RuntimeConfig::default()
    });
    let _g = runtime.enter();
    let s = signal(0);

    let mut chain = {
        let s = s.clone();
        computed(move || s.get())
    };
    // Reading each link as it is added keeps every evaluation shallow.
    for _ in 0..16 {
        let prev = chain.clone();
        chain = computed(move || prev.get() + 1);
        chain.get();
    }
    assert_eq!(chain.get(), 16);

    // A change at the bottom is pulled through the whole chain at once.
    let _e = {
        let chain = chain.clone();
        effect(move || {
            chain.get();
        })
    };
    let err = s.try_set(1).unwrap_err();
    assert!(matches!(err, Error::DepthExceeded { limit: 8 }));
}

#[test]
fn runtimes_are_isolated() {
    let (first, first_guard) = isolated();
    let s = signal(0);
    let (n, runs) = counter();
    let _e = {
        let s = s.clone();
        effect(move || {
            s.get();
            runs.set(runs.get() + 1);
        })
    };
    drop(first_guard);

    let second = Runtime::default();
    {
        let _g = second.enter();
        let other = signal(0);
        other.set(1);
        assert_eq!(second.node_count(), 1);
        // Writes to a signal keep flowing through the runtime it was made in.
        s.set(1);
    }

    assert_eq!(n.get(), 2);
    assert_eq!(first.node_count(), 2);
}

/// Re-runs triggered while another runtime is current still register
/// cleanups, untracked reads and nested effects with the effect's own
/// runtime.
#[test]
fn rerun_inside_foreign_runtime_uses_owning_runtime() {
    let (home, home_guard) = isolated();
    let tracked = signal(0);
    let ignored = signal(0);
    let inner_source = signal(0);
    let cleaned = Rc::new(RefCell::new(Vec::new()));
    let (n, runs) = counter();
    let (inner_n, inner_runs) = counter();

    let _e = {
        let (tracked, ignored, inner_source, cleaned) = (
            tracked.clone(),
            ignored.clone(),
            inner_source.clone(),
            cleaned.clone(),
        );
        effect(move || {
            let v = tracked.get();
            untrack(|| ignored.get());
            runs.set(runs.get() + 1);

            let cleaned = cleaned.clone();
            on_cleanup(move || cleaned.borrow_mut().push(v));

            let (inner_source, inner_runs) = (inner_source.clone(), inner_runs.clone());
            effect(move || {
                inner_source.get();
                inner_runs.set(inner_runs.get() + 1);
            });
        })
    };
    drop(home_guard);

    let foreign = Runtime::default();
    let _foreign_guard = foreign.enter();

    tracked.set(1);
    tracked.set(2);
    assert_eq!(n.get(), 3);
    assert_eq!(*cleaned.borrow(), vec![0, 1]);

    // Still untracked after the re-runs.
    ignored.set(1);
    assert_eq!(n.get(), 3);
    assert_eq!(ignored.subscriber_count(), 0);

    // Only the child from the latest run is alive, and it lives at home.
    assert_eq!(inner_n.get(), 3);
    assert_eq!(inner_source.subscriber_count(), 1);
    inner_source.set(1);
    assert_eq!(inner_n.get(), 4);

    assert_eq!(foreign.node_count(), 0);
    assert_eq!(home.node_count(), 5);
}

struct DropFlag(Rc<Cell<bool>>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.set(true);
    }
}

/// Dropping a runtime frees the effects and mount callbacks it still holds.
#[test]
fn dropped_runtime_releases_live_effects() {
    let effect_dropped = Rc::new(Cell::new(false));
    let mount_dropped = Rc::new(Cell::new(false));
    let s;
    {
        let runtime = Runtime::default();
        let _g = runtime.enter();
        s = signal(0);

        let root = push_scope();
        {
            let flag = DropFlag(mount_dropped.clone());
            on_mount(move || {
                Box::new(move || {
                    let _flag = &flag;
                }) as Cleanup
            });
        }
        let handle = {
            let (s, flag) = (s.clone(), DropFlag(effect_dropped.clone()));
            effect(move || {
                let _flag = &flag;
                s.get();
            })
        };
        pop_scope();

        s.set(1);
        assert_eq!(handle.run_count(), 2);
        assert!(!effect_dropped.get());
        drop(handle);
        drop(root);
    }

    assert!(effect_dropped.get());
    assert!(mount_dropped.get());

    // The signal outlived its runtime: it still stores values.
    s.set(2);
    assert_eq!(s.peek(), 2);
    assert_eq!(s.subscriber_count(), 0);
}

#[test]
fn late_resumption_after_dispose_is_ignored() {
    let (_rt, _g) = isolated();
    let target = signal(0);
    let (tx, rx) = tokio::sync::oneshot::channel::<i32>();

    let tokio_rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let local = tokio::task::LocalSet::new();

    let applied = local.block_on(&tokio_rt, async {
        let scope = push_scope();
        let alive = liveness();
        pop_scope();

        let task = {
            let target = target.clone();
            tokio::task::spawn_local(async move {
                let fetched = alive.guard(async move { rx.await.ok() }).await.flatten();
                if let Some(v) = fetched {
                    target.set(v);
                    true
                } else {
                    false
                }
            })
        };

        // The owner goes away while the request is in flight.
        scope.dispose();
        let _ = tx.send(42);
        task.await.unwrap()
    });

    assert!(!applied);
    assert_eq!(target.peek(), 0);
}

#[test]
fn resumption_while_alive_is_applied() {
    let (_rt, _g) = isolated();
    let target = signal(0);

    let tokio_rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let local = tokio::task::LocalSet::new();

    local.block_on(&tokio_rt, async {
        let scope = push_scope();
        let alive = liveness();
        pop_scope();

        let fetched = alive.guard(async { 7 }).await;
        if let Some(v) = fetched {
            target.set(v);
        }
        scope.dispose();
    });

    assert_eq!(target.peek(), 7);
}
