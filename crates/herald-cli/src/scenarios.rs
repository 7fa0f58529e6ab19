//! Demo scenarios.
//!
//! Each scenario wires a few events together, raises them, and returns a
//! transcript of what every listener observed.

use std::sync::{Arc, Mutex};

use herald_events::{DispatchConfig, Event, EventArgs, PriorityBand};
use tracing::{info, warn};

use crate::commands::Result;

/// The sender every demo event is raised by.
#[derive(Debug, Clone)]
pub struct Server {
    pub name: String,
}

impl Server {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Lines written by listeners while a scenario runs.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Transcript {
    pub fn push(&self, line: impl Into<String>) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.into());
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct WorldSave {
    pub world: String,
    pub chunks: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkBatch {
    pub world: String,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct RegionFlush {
    pub regions: usize,
}

const CHUNKS_PER_REGION: usize = 32;

/// Reads the source args inside a derive closure, which cannot fail.
fn read_or_default<P, R: Default>(args: &EventArgs<Server, P>, f: impl FnOnce(&P) -> R) -> R {
    match args.read(f) {
        Ok(value) => value,
        Err(e) => {
            warn!(args = %args.id(), error = %e, "could not read source args, deriving from defaults");
            R::default()
        }
    }
}

/// Saves a world: `world-save` fans out into `chunk-save`, which fans out
/// into `region-flush`. The post-event listener reports the outcome.
pub fn world_save(config: &DispatchConfig, cancel: bool) -> Result<Vec<String>> {
    let transcript = Transcript::default();

    let save: Event<Server, WorldSave> = Event::with_config("world-save", config.clone());
    let chunks: Event<Server, ChunkBatch> = Event::with_config("chunk-save", config.clone());
    let regions: Event<Server, RegionFlush> = Event::with_config("region-flush", config.clone());

    save.register_dependent(&chunks, |_, args: &EventArgs<Server, WorldSave>| {
        let (world, count) = read_or_default(args, |s| (s.world.clone(), s.chunks));
        EventArgs::new(ChunkBatch { world, count })
    })?;
    chunks.register_dependent(&regions, |_, args: &EventArgs<Server, ChunkBatch>| {
        let count = read_or_default(args, |b| b.count);
        EventArgs::new(RegionFlush {
            regions: count.div_ceil(CHUNKS_PER_REGION),
        })
    })?;

    let t = transcript.clone();
    save.listen(PriorityBand::Normal, move |server: &Server, args: &EventArgs<Server, WorldSave>| {
        let world = args.read(|s| s.world.clone())?;
        t.push(format!("[{}] preparing save of {}", server.name, world));
        if cancel {
            t.push("save vetoed: world is locked".to_string());
            args.set_cancelled(true)?;
        }
        Ok(())
    })?;

    let t = transcript.clone();
    chunks.listen(PriorityBand::High, move |_: &Server, args: &EventArgs<Server, ChunkBatch>| {
        let (world, count) = args.read(|b| (b.world.clone(), b.count))?;
        if args.is_cancelled() {
            t.push(format!("skipping {} chunks of {}", count, world));
        } else {
            t.push(format!("writing {} chunks of {}", count, world));
        }
        Ok(())
    })?;

    let t = transcript.clone();
    regions.listen(PriorityBand::Highest, move |_: &Server, args: &EventArgs<Server, RegionFlush>| {
        if !args.is_cancelled() {
            let regions = args.read(|r| r.regions)?;
            t.push(format!("flushing {} region files", regions));
        }
        Ok(())
    })?;

    let t = transcript.clone();
    save.listen(PriorityBand::Monitor, move |_: &Server, args: &EventArgs<Server, WorldSave>| {
        t.push(format!(
            "monitor: cancelled={} mutable={}",
            args.is_cancelled(),
            args.is_mutable()
        ));
        Ok(())
    })?;

    let t = transcript.clone();
    save.listen(PriorityBand::Post, move |_: &Server, args: &EventArgs<Server, WorldSave>| {
        let world = args.read(|s| s.world.clone())?;
        if args.is_cancelled() {
            t.push(format!("save of {} was cancelled", world));
        } else {
            t.push(format!("{} saved", world));
        }
        Ok(())
    })?;

    let server = Server::new("survival-1");
    let args = EventArgs::new(WorldSave {
        world: "overworld".to_string(),
        chunks: 80,
    });

    info!(world = "overworld", cancel, "running world-save demo");
    save.raise(&server, &args)?;
    transcript.push(format!("-- pre-event done ({:?})", args.status()));
    save.raise_post_event(&server, &args)?;
    transcript.push(format!("-- post-event done ({:?})", args.status()));

    Ok(transcript.lines())
}

#[derive(Debug, Clone)]
pub struct BlockBreak {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Debug, Clone)]
pub struct ItemDrop {
    pub item: String,
    pub count: u32,
}

/// Breaks a block and drops its item as one merged raise.
///
/// A protection listener on the block event may cancel it. With `shared`,
/// the item drop sees that cancellation too.
pub fn alongside(config: &DispatchConfig, cancel: bool, shared: bool) -> Result<Vec<String>> {
    let transcript = Transcript::default();

    let blocks: Event<Server, BlockBreak> = Event::with_config("block-break", config.clone());
    let drops: Event<Server, ItemDrop> = Event::with_config("item-drop", config.clone());

    let t = transcript.clone();
    blocks.listen(PriorityBand::High, move |_: &Server, args: &EventArgs<Server, BlockBreak>| {
        let (x, y, z) = args.read(|b| (b.x, b.y, b.z))?;
        t.push(format!("protection check at {},{},{}", x, y, z));
        if cancel {
            t.push("block is protected".to_string());
            args.set_cancelled(true)?;
        }
        Ok(())
    })?;

    let t = transcript.clone();
    drops.listen(PriorityBand::Highest, move |_: &Server, args: &EventArgs<Server, ItemDrop>| {
        let (item, count) = args.read(|d| (d.item.clone(), d.count))?;
        if args.is_cancelled() {
            t.push(format!("drop of {} x{} suppressed", item, count));
        } else {
            t.push(format!("dropping {} x{}", item, count));
        }
        Ok(())
    })?;

    let t = transcript.clone();
    blocks.listen(PriorityBand::Post, move |_: &Server, args: &EventArgs<Server, BlockBreak>| {
        t.push(format!("block break cancelled={}", args.is_cancelled()));
        Ok(())
    })?;

    let t = transcript.clone();
    drops.listen(PriorityBand::Post, move |_: &Server, args: &EventArgs<Server, ItemDrop>| {
        t.push(format!("item drop cancelled={}", args.is_cancelled()));
        Ok(())
    })?;

    let server = Server::new("survival-1");
    let block_args = EventArgs::new(BlockBreak { x: 12, y: 64, z: -3 });
    let drop_args = EventArgs::new(ItemDrop {
        item: "cobblestone".to_string(),
        count: 1,
    });
    let others = [drops.participant(&drop_args)];

    info!(cancel, shared, "running alongside demo");
    blocks.raise_alongside(&server, &block_args, &others, shared)?;
    blocks.raise_post_event_alongside(&server, &block_args, &others, shared)?;

    Ok(transcript.lines())
}
