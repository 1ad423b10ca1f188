use clap::Parser;
use rust_dirview::{
	CellValue, Column, RecordingSink, ResourceId, SchemeRegistry, SortKey, SortOrder, SortSpec,
	ViewChange, ViewModel, ViewModelConfig,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "dirview")]
#[command(about = "Lists a directory incrementally and keeps the listing live")]
struct Cli {
	/// Directory to show
	#[arg(short, long)]
	path: PathBuf,

	/// Sort column: name, size, type, modified or created
	#[arg(short, long, default_value_t = SortKey::Name)]
	sort: SortKey,

	/// Sort descending
	#[arg(short, long)]
	descending: bool,

	/// Keep running and print changes until interrupted
	#[arg(short, long)]
	watch: bool,

	/// Print changes as JSON lines
	#[arg(long)]
	json: bool,

	/// Traversal batch time window in milliseconds
	#[arg(long, default_value_t = 15)]
	batch_window: u64,

	/// Maximum entries per traversal batch
	#[arg(long, default_value_t = 1000)]
	batch_size: usize,

	/// Enable verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let level = if cli.verbose {
		Level::DEBUG
	} else {
		Level::INFO
	};
	tracing_subscriber::fmt().with_max_level(level).init();

	let root = ResourceId::local(std::fs::canonicalize(&cli.path)?);
	let order = if cli.descending {
		SortOrder::Descending
	} else {
		SortOrder::Ascending
	};
	let config = ViewModelConfig {
		batch_time_window: Duration::from_millis(cli.batch_window),
		batch_max_entries: cli.batch_size,
		initial_sort: Some(SortSpec::new(cli.sort, order)),
		..Default::default()
	};

	let mut model = ViewModel::new(SchemeRegistry::with_local(), config, RecordingSink::new())?;
	model.set_root(root.clone())?;
	while !model.run_until_idle(Duration::from_secs(1)).await {
		info!("Still listing {} ({} entries so far)", root, model.row_count());
	}
	model.sink_mut().take();

	print_listing(&model, cli.json)?;
	if let Some(e) = model.last_error() {
		warn!("Listing of {} is incomplete: {}", root, e);
	}

	if !cli.watch {
		return Ok(());
	}
	if !model.live_updates() {
		warn!("Watching is unavailable for {}; exiting after the snapshot", root);
		return Ok(());
	}

	info!("Watching {} for changes, press Ctrl-C to stop", root);
	loop {
		let more = tokio::select! {
			_ = tokio::signal::ctrl_c() => false,
			more = model.process_next() => more,
		};
		if !more {
			break;
		}
		model.process_pending();
		let changes = model.sink_mut().take();
		print_changes(&model, &changes, cli.json)?;
	}

	info!("Shutting down: {:?}", model.reconciler_stats());
	Ok(())
}

fn print_listing(model: &ViewModel<RecordingSink>, json: bool) -> anyhow::Result<()> {
	for row in 0..model.row_count() {
		let Some(node) = model.node_at(row) else {
			continue;
		};
		if json {
			println!("{}", serde_json::to_string(&*node)?);
		} else {
			println!("{}", describe_row(model, row));
		}
	}
	Ok(())
}

fn print_changes(
	model: &ViewModel<RecordingSink>, changes: &[ViewChange], json: bool,
) -> anyhow::Result<()> {
	for change in changes {
		if json {
			println!("{}", serde_json::to_string(change)?);
			continue;
		}
		match change {
			ViewChange::InsertRows { first, last } => {
				for row in *first..=*last {
					println!("+ {}", describe_row(model, row));
				}
			}
			ViewChange::RemoveRows { first, last } => println!("- rows {first}..={last}"),
			ViewChange::DataChanged { first, last } if first == last => {
				println!("~ {}", describe_row(model, *first));
			}
			ViewChange::DataChanged { first, last } => println!("~ rows {first}..={last}"),
			ViewChange::Reset => println!("* view reset ({} rows)", model.row_count()),
			ViewChange::RootChanged(root) => println!("> {root}"),
			ViewChange::StateChanged(_) => {}
			ViewChange::WatchReleased(id) => println!("! no longer watching {id}"),
		}
	}
	Ok(())
}

fn describe_row(model: &ViewModel<RecordingSink>, row: usize) -> String {
	let text = |column: Column| match model.data(row, &column) {
		Some(CellValue::Text(text)) => text,
		Some(CellValue::Bytes(bytes)) => bytes.to_string(),
		Some(CellValue::Time(time)) => time.format("%Y-%m-%d %H:%M").to_string(),
		None => "-".to_string(),
	};
	format!(
		"{:>5}  {:<40} {:>12} {:<10} {}",
		row,
		text(Column::Name),
		text(Column::Size),
		text(Column::Type),
		text(Column::Modified)
	)
}
