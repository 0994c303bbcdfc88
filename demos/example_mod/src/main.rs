//! Example host: loads the example mod into a runtime and ticks it.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use components::{GuestComponent, MyComponent, MyMarker, Transform};
use glam::Vec3;
use modecs_app::{ModSchedules, Runtime, RuntimeConfig};
use modecs_component::{Bundle, CompiledQuery, EntityScope, QueryFor};
use tracing::info;
use tracing_subscriber::EnvFilter;

use example_mod::ExampleMod;

#[derive(Parser)]
#[command(name = "example-host", about = "Run the example mod in a local runtime")]
struct Args {
    /// Path to a JSON runtime config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of frames to run (overrides the config)
    #[arg(short, long, default_value_t = 120)]
    ticks: u64,

    /// Frames per second (overrides the config)
    #[arg(long)]
    tick_rate: Option<f64>,

    /// Number of marked cubes to spawn before loading the mod
    #[arg(long, default_value_t = 3)]
    cubes: u32,

    /// Run the mod inside a sandbox holding the cubes instead of the world
    #[arg(long)]
    sandboxed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("example_mod=info".parse()?)
                .add_directive("modecs_app=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "loading runtime config");
            RuntimeConfig::load(path)?
        }
        None => RuntimeConfig::default(),
    };
    config = config.with_max_ticks(args.ticks);
    if let Some(rate) = args.tick_rate {
        config = config.with_tick_rate(rate);
    }
    config.validate()?;

    let mut runtime = Runtime::new(config)?;
    let scope = if args.sandboxed {
        EntityScope::Sandbox(runtime.create_sandbox(ModSchedules::default())?)
    } else {
        EntityScope::World
    };

    let world = runtime.world_mut()?;
    for i in 0..args.cubes {
        let transform = Transform::from_translation(Vec3::new(i as f32 * 2.0, 0.0, 0.0));
        let cube = world.spawn(Bundle::from(vec![transform.entry()?, MyMarker.entry()?]));
        if let Some(sandbox) = scope.sandbox() {
            world.add_to_sandbox(cube, sandbox)?;
        }
    }
    info!(cubes = args.cubes, %scope, "spawned cubes");

    let mod_id = runtime.load_mod(&ExampleMod)?;
    if scope != EntityScope::World {
        runtime.disable_access(mod_id, EntityScope::World)?;
        runtime.enable_access(mod_id, scope)?;
    }
    let ticks = runtime.run().await?;

    let counters = CompiledQuery::build(&[QueryFor::With(MyComponent::NAME.into())]);
    let cubes = CompiledQuery::build(&[
        QueryFor::Ref(Transform::NAME.into()),
        QueryFor::With(MyMarker::NAME.into()),
    ]);
    for result in runtime.world().query_in(&cubes, scope) {
        let transform = Transform::from_payload(&result.component(0)?.get())?;
        let (axis, angle) = transform.rotation.to_axis_angle();
        info!(entity = %result.entity(), ?axis, angle, "cube");
    }
    info!(
        ticks,
        entities = runtime.world().entity_count(),
        counters = runtime.world().query_in(&counters, scope).count(),
        "done"
    );

    runtime.shutdown();
    Ok(())
}
