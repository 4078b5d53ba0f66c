use clap::Parser;
use jprobe_planner::editor::PassthroughEditor;
use jprobe_planner::planner::{InstrPlanner, LoadedClassesSnapshot};
use jprobe_planner::repository::ClassRepository;
use jprobe_planner::roots::{InstrFilter, RootSpec};
use jprobe_planner::source::DirSource;
use jprobe_planner::{LoaderId, PlannerConfig, telemetry};
use tracing_log::log::{debug, warn};

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    #[arg(
        short = 'c',
        long = "classpath",
        visible_alias = "cp",
        value_delimiter = ';',
        help = "Classpath directories to scan for .class files; use ';' as separator"
    )]
    pub class_path: Vec<String>,
    #[arg(
        short = 'r',
        long = "root",
        help = "Root pattern CLASS or CLASS::METHOD(SIG); terminal '*' matches a \
        package subtree, a 'marker:' prefix declares a marker instead of a root"
    )]
    pub roots: Vec<String>,
    #[arg(
        short = 'f',
        long = "filter",
        help = "Instrumentation filter glob; '+' prefix includes, '-' excludes"
    )]
    pub filters: Vec<String>,
    #[arg(long, help = "Auto-root run() on Runnable implementors")]
    pub spawned_threads: bool,
    #[arg(long, help = "Also instrument single-return method bodies")]
    pub keep_empty: bool,
    #[arg(long, help = "Also instrument trivial getters and setters")]
    pub keep_getters: bool,
    #[arg(long, help = "Skip constructors of split-verifier class files")]
    pub skip_constructors: bool,
}

fn parse_root(spec: &str) -> RootSpec {
    let (marker, rest) = match spec.strip_prefix("marker:") {
        Some(rest) => (true, rest),
        None => (false, spec),
    };
    match rest.split_once("::") {
        Some((class, method_part)) => {
            let (method, signature) = match method_part.find('(') {
                Some(pos) => (
                    method_part[..pos].to_string(),
                    method_part[pos..].to_string(),
                ),
                None => (method_part.to_string(), String::new()),
            };
            RootSpec {
                class: class.to_string(),
                method,
                signature,
                marker,
            }
        }
        None => RootSpec {
            class: rest.to_string(),
            method: "*".to_string(),
            signature: String::new(),
            marker,
        },
    }
}

fn parse_filters(filters: &[String]) -> InstrFilter {
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    for f in filters {
        if let Some(pattern) = f.strip_prefix('-') {
            exclude.push(pattern.to_string());
        } else {
            include.push(f.strip_prefix('+').unwrap_or(f).to_string());
        }
    }
    InstrFilter::new(include, exclude)
}

#[hotpath::main]
fn main() {
    telemetry::init_tracing();
    let mut args = Args::parse();
    debug!("Provided command line arguments: {:?}", args);

    if args.class_path.is_empty() {
        let current_dir = std::env::current_dir()
            .map(|v| v.to_string_lossy().to_string())
            .expect("cannot get current dir");
        args.class_path.push(current_dir);
    }

    let config = PlannerConfig {
        instrument_spawned_threads: args.spawned_threads,
        dont_instrument_empty: !args.keep_empty,
        dont_scan_getter_setter: !args.keep_getters,
        skip_constructors: args.skip_constructors,
        profile_points: Vec::new(),
    };
    let filter = parse_filters(&args.filters);
    let roots: Vec<RootSpec> = args.roots.iter().map(|s| parse_root(s)).collect();

    let source = DirSource::new(args.class_path.iter().map(Into::into).collect());
    let class_names = source.indexed_class_names();
    if class_names.is_empty() {
        eprintln!("No .class files found on the classpath");
        std::process::exit(1);
    }

    let repo = ClassRepository::new(Box::new(source));
    let mut planner = InstrPlanner::new(repo, config, filter, Box::new(PassthroughEditor));

    let mut planned = 0usize;
    match planner.initial(LoadedClassesSnapshot::default(), &roots) {
        Ok(pack) => planned += pack.len(),
        Err(e) => {
            eprintln!("Error replaying attach-time snapshot: {}", e);
            std::process::exit(1);
        }
    }

    for name in &class_names {
        match planner.on_class_load(name, LoaderId::BOOTSTRAP) {
            Ok(pack) => {
                for (class, _loader, idx, info) in pack.iter() {
                    debug!("instrument {} method #{} ({} bytes)", class, idx, info.len());
                }
                planned += pack.len();
            }
            Err(e) => warn!("skipping {}: {}", name, e),
        }
    }

    println!(
        "planned probes for {} methods across {} known classes",
        planned,
        planner.repository().class_count()
    );
}
