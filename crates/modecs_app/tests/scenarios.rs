//! End-to-end scenarios: mods loaded into a runtime, run for a few frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use modecs_app::{ConfigError, Mod, ModSchedules, ModSetup, Runtime, RuntimeConfig, Schedule};
use modecs_component::{Bundle, EntityScope, QueryFor};
use modecs_system::System;

/// A mod whose setup is a closure.
struct TestMod<F> {
    name: &'static str,
    setup: F,
}

impl<F> Mod for TestMod<F>
where
    F: Fn(&mut ModSetup<'_>) -> Result<(), ConfigError> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn setup(&self, setup: &mut ModSetup<'_>) -> Result<(), ConfigError> {
        (self.setup)(setup)
    }
}

fn test_mod<F>(name: &'static str, setup: F) -> TestMod<F>
where
    F: Fn(&mut ModSetup<'_>) -> Result<(), ConfigError> + Send + Sync,
{
    TestMod { name, setup }
}

fn count_with(runtime: &Runtime, component: &str) -> usize {
    let query = modecs_component::CompiledQuery::build(&[QueryFor::With(component.to_string())]);
    runtime.world().query(&query).count()
}

#[tokio::test]
async fn test_marked_transform_is_updated() {
    let mut runtime = Runtime::default();
    let entity = runtime.world_mut().unwrap().spawn(
        Bundle::new()
            .with("game::Transform", r#"{"angle":0}"#)
            .with("game::MyMarker", "{}"),
    );

    runtime
        .load_mod(&test_mod("spinner", |setup| {
            let mut spin = System::new("spin", |ctx| {
                for result in ctx.query(0)? {
                    let transform = result.component(0)?;
                    let value: serde_json::Value = serde_json::from_str(&transform.get())?;
                    let angle = value["angle"].as_i64().unwrap_or_default() + 15;
                    transform.set(serde_json::json!({ "angle": angle }).to_string())?;
                }
                Ok(())
            });
            spin.add_query(&[
                QueryFor::Mut("game::Transform".into()),
                QueryFor::With("game::MyMarker".into()),
            ]);
            setup.app()?.add_systems(Schedule::Update, [spin]);
            Ok(())
        }))
        .unwrap();

    runtime.update(0.0).await.unwrap();

    assert_eq!(
        runtime.world().get(entity, "game::Transform").as_deref(),
        Some(r#"{"angle":15}"#)
    );
    assert_eq!(runtime.world().entity_count(), 1);
}

#[tokio::test]
async fn test_count_gated_spawner_stops_at_ten() {
    let mut runtime = Runtime::default();
    runtime
        .load_mod(&test_mod("gate", |setup| {
            let mut my_system = System::new("my-system", |ctx| {
                if ctx.query(0)?.count() < 10 {
                    ctx.commands()?
                        .spawn(Bundle::new().with("game::MyComponent", r#"{"value":0}"#));
                }
                Ok(())
            });
            my_system
                .add_commands()
                .add_query(&[QueryFor::With("game::MyComponent".into())]);
            setup.app()?.add_systems(Schedule::Update, [my_system]);
            Ok(())
        }))
        .unwrap();

    for _ in 0..10 {
        runtime.update(0.0).await.unwrap();
    }
    assert_eq!(count_with(&runtime, "game::MyComponent"), 10);

    let frame = runtime.update(0.0).await.unwrap();
    assert_eq!(frame.stages[0].commands.applied, 0);
    assert_eq!(count_with(&runtime, "game::MyComponent"), 10);
}

#[tokio::test]
async fn test_cycle_rejected_at_load() {
    let mut runtime = Runtime::default();
    let ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&ran);
    let result = runtime.load_mod(&test_mod("cyclic", move |setup| {
        let make = |name: &str| {
            let flag = Arc::clone(&flag);
            System::new(name, move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
        };
        let mut a = make("a");
        let mut b = make("b");
        let mut c = make("c");
        a.before(&b);
        b.before(&c);
        c.before(&a);
        setup.app()?.add_systems(Schedule::Update, [a, b, c]);
        Ok(())
    }));

    assert!(matches!(result, Err(ConfigError::Cycle { .. })));
    assert_eq!(runtime.mod_count(), 0);
    assert_eq!(runtime.registry().system_count(), 0);

    runtime.update(0.0).await.unwrap();
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_app_twice_rejected() {
    let mut runtime = Runtime::default();
    let result = runtime.load_mod(&test_mod("greedy", |setup| {
        setup
            .app()?
            .add_systems(Schedule::Update, [System::new("first", |_| Ok(()))]);
        setup.app()?;
        Ok(())
    }));
    assert!(matches!(result, Err(ConfigError::AppAlreadyCreated { .. })));
    assert_eq!(runtime.registry().system_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mut_writers_never_interleave() {
    let mut runtime = Runtime::default();
    let counter = runtime
        .world_mut()
        .unwrap()
        .spawn(Bundle::new().with("game::Counter", "0"));
    let active = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicBool::new(false));

    let (active_in, overlapped_in) = (Arc::clone(&active), Arc::clone(&overlapped));
    runtime
        .load_mod(&test_mod("writers", move |setup| {
            let make = |name: &str| {
                let active = Arc::clone(&active_in);
                let overlapped = Arc::clone(&overlapped_in);
                let mut system = System::new(name, move |ctx| {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlapped.store(true, Ordering::SeqCst);
                    }
                    for _ in 0..500 {
                        for result in ctx.query(0)? {
                            let component = result.component(0)?;
                            let value: u64 = component.get().parse()?;
                            component.set((value + 1).to_string())?;
                        }
                    }
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                });
                system.add_query(&[QueryFor::Mut("game::Counter".into())]);
                system
            };
            setup
                .app()?
                .add_systems(Schedule::Update, [make("w1"), make("w2")]);
            Ok(())
        }))
        .unwrap();

    let plan = &runtime.registry().get(&Schedule::Update).unwrap().plan;
    assert_eq!(plan.batches.len(), 2);

    runtime.update(0.0).await.unwrap();
    assert_eq!(
        runtime.world().get(counter, "game::Counter").as_deref(),
        Some("1000")
    );
    assert!(!overlapped.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjoint_systems_share_a_batch() {
    let mut runtime = Runtime::default();
    let entity = runtime
        .world_mut()
        .unwrap()
        .spawn(Bundle::new().with("A", "0").with("B", "0"));

    runtime
        .load_mod(&test_mod("disjoint", |setup| {
            let make = |name: &str, component: &'static str| {
                let mut system = System::new(name, move |ctx| {
                    for result in ctx.query(0)? {
                        result.component(0)?.set(component)?;
                    }
                    Ok(())
                });
                system.add_query(&[QueryFor::Mut(component.into())]);
                system
            };
            setup
                .app()?
                .add_systems(Schedule::Update, [make("write-a", "A"), make("write-b", "B")]);
            Ok(())
        }))
        .unwrap();

    let plan = &runtime.registry().get(&Schedule::Update).unwrap().plan;
    assert_eq!(plan.batches.len(), 1);

    let frame = runtime.update(0.0).await.unwrap();
    assert_eq!(frame.stages[0].batches, 1);
    assert_eq!(runtime.world().get(entity, "A").as_deref(), Some("A"));
    assert_eq!(runtime.world().get(entity, "B").as_deref(), Some("B"));
}

#[tokio::test]
async fn test_commands_apply_in_plan_order() {
    let mut runtime = Runtime::default();
    let entity = runtime.world_mut().unwrap().spawn_empty();

    runtime
        .load_mod(&test_mod("ordered", move |setup| {
            let writer = |name: &str, payload: &'static str| {
                let mut system = System::new(name, move |ctx| {
                    ctx.commands()?
                        .entity(entity)
                        .insert(Bundle::new().with("Label", payload));
                    Ok(())
                });
                system.add_commands();
                system
            };
            let late = writer("late", "late");
            let mut early = writer("early", "early");
            early.before(&late);
            setup.app()?.add_systems(Schedule::Update, [late, early]);
            Ok(())
        }))
        .unwrap();

    runtime.update(0.0).await.unwrap();
    assert_eq!(runtime.world().get(entity, "Label").as_deref(), Some("late"));
}

#[tokio::test]
async fn test_stale_entity_commands_do_not_block_others() {
    let mut runtime = Runtime::default();
    let doomed = runtime.world_mut().unwrap().spawn(Bundle::new().with("Doomed", "{}"));
    let survivor = runtime.world_mut().unwrap().spawn_empty();

    runtime
        .load_mod(&test_mod("stale", move |setup| {
            let mut reaper = System::new("reaper", move |ctx| {
                let commands = ctx.commands()?;
                commands.entity(doomed).despawn();
                commands.entity(doomed).insert(Bundle::new().with("Late", "{}"));
                commands.entity(doomed).try_despawn();
                commands
                    .entity(survivor)
                    .insert(Bundle::new().with("Alive", "{}"));
                Ok(())
            });
            reaper.add_commands();
            setup.app()?.add_systems(Schedule::Update, [reaper]);
            Ok(())
        }))
        .unwrap();

    let frame = runtime.update(0.0).await.unwrap();
    let stage = &frame.stages[0];
    assert_eq!(stage.commands.applied, 2);
    assert_eq!(stage.commands.dropped, 2);
    assert!(!runtime.world().is_alive(doomed));
    assert!(runtime.world().contains(survivor, "Alive"));
}

#[tokio::test]
async fn test_inserted_payload_reads_back_exactly() {
    let mut runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    let payload = r#"{"x":1.5,"tags":["a","b"]}"#;
    let entity = runtime.world_mut().unwrap().spawn_empty();
    runtime
        .world_mut()
        .unwrap()
        .insert(
            entity,
            Bundle::new().with("First", payload).with("Second", "2"),
        )
        .unwrap();

    let query = modecs_component::CompiledQuery::build(&[
        QueryFor::Ref("First".into()),
        QueryFor::With("Second".into()),
        QueryFor::Mut("Second".into()),
    ]);
    let result = runtime.world().query(&query).next().unwrap();
    assert_eq!(result.entity(), entity);
    assert_eq!(result.component(0).unwrap().get(), payload);
    assert_eq!(result.component(1).unwrap().get(), "2");
    assert!(result.component(2).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mod_confined_to_sandboxes() {
    let mut runtime = Runtime::default();
    let left = runtime.create_sandbox(ModSchedules::default()).unwrap();
    let right = runtime.create_sandbox(ModSchedules::default()).unwrap();
    let world = runtime.world_mut().unwrap();
    let host_counter = world.spawn(Bundle::new().with("game::Counter", "0"));
    let left_counter = world.spawn(Bundle::new().with("game::Counter", "0"));
    let right_counter = world.spawn(Bundle::new().with("game::Counter", "0"));
    world.add_to_sandbox(left_counter, left).unwrap();
    world.add_to_sandbox(right_counter, right).unwrap();

    let id = runtime
        .load_mod(&test_mod("counter", |setup| {
            let mut bump = System::new("bump", |ctx| {
                for result in ctx.query(0)? {
                    let counter = result.component(0)?;
                    let next = counter.get().parse::<u32>()? + 1;
                    counter.set(next.to_string())?;
                }
                Ok(())
            });
            bump.add_query(&[QueryFor::Mut("game::Counter".into())]);
            setup.app()?.add_systems(Schedule::Update, [bump]);
            Ok(())
        }))
        .unwrap();
    runtime.disable_access(id, EntityScope::World).unwrap();
    runtime.enable_access(id, EntityScope::Sandbox(left)).unwrap();
    runtime.enable_access(id, EntityScope::Sandbox(right)).unwrap();

    let mut batches = Vec::new();
    for _ in 0..3 {
        let frame = runtime.update(0.0).await.unwrap();
        batches.push(frame.stages[0].batches);
    }

    let world = runtime.world();
    assert_eq!(batches, vec![1, 1, 1]);
    assert_eq!(world.get(host_counter, "game::Counter").as_deref(), Some("0"));
    assert_eq!(world.get(left_counter, "game::Counter").as_deref(), Some("3"));
    assert_eq!(world.get(right_counter, "game::Counter").as_deref(), Some("3"));

    // Once the sandbox is gone, only the other one keeps counting.
    runtime.remove_sandbox(left).unwrap();
    runtime.update(0.0).await.unwrap();
    assert!(!runtime.world().is_alive(left_counter));
    assert_eq!(
        runtime.world().get(right_counter, "game::Counter").as_deref(),
        Some("4")
    );
}
