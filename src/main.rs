use clap::{Parser, Subcommand};
use lectern::editor::{DeleteScope, Upload};
use lectern::events::ProgressEvent;
use lectern::publish::Credentials;
use lectern::site::{Site, SiteOptions};
use lectern::{config, output};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("LECTERN_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("LECTERN_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "lectern")]
#[command(about = "Content resolution and incremental builds for file-backed sites")]
#[command(long_about = "\
Content resolution and incremental builds for file-backed sites

The content/ directory is the data source. Every directory is a record whose
fields live in contents.lr; other files are its attachments. Localized
overlays sit next to the primary file as contents+<alt>.lr.

Project structure:

  project.toml                     # Project config, alternatives, publish targets
  models/
  │   ├── page.toml                # Default model
  │   └── blog-post.toml           # [model] [children] [attachments] [fields.*]
  content/
  ├── contents.lr                  # Root record
  ├── contents+de.lr               # German overlay of the root record
  ├── hello.txt                    # Attachment of the root record
  └── blog/
      ├── contents.lr              # _model: blog
      └── post1/
          └── contents.lr          # title, pub_date, body

Paths are slash-separated record paths (/blog/post1). Alts are named by id;
'_primary' always names the primary alt.

Run 'lectern gen-config' to generate a documented project.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Project root (the directory holding project.toml)
    #[arg(long, short = 'p', default_value = ".", global = true)]
    project: PathBuf,

    /// Output directory (defaults to project.output_path)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Print results as JSON, and progress as raw event frames
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

/// Record path and alt shared by record commands.
#[derive(clap::Args, Clone)]
struct RecordArgs {
    /// Record path, e.g. /blog/post1
    path: String,

    /// Alt id
    #[arg(long, default_value = "_primary")]
    alt: String,
}

#[derive(Subcommand)]
enum Command {
    /// Build every record and attachment, then prune orphaned output
    Build,
    /// Remove orphaned output, or all tracked output with --all
    Clean {
        #[arg(long)]
        all: bool,
    },
    /// Show a record with its children, attachments and alts
    Info(RecordArgs),
    /// Show the ancestors of a path
    PathInfo { path: String },
    /// Show the public URL of a record
    Preview(RecordArgs),
    /// Find the record behind a public URL
    MatchUrl { url: String },
    /// Search record titles
    Find {
        query: String,
        #[arg(long, default_value = "_primary")]
        alt: String,
        /// Language to report titles in
        #[arg(long)]
        lang: Option<String>,
    },
    /// Print the fields stored in a record's own file
    RawGet(RecordArgs),
    /// Set or remove fields in a record's own file
    RawSet {
        #[command(flatten)]
        record: RecordArgs,
        /// Field to set
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
        /// Field to remove
        #[arg(long = "unset", value_name = "FIELD")]
        unset: Vec<String>,
    },
    /// Create a child record
    NewRecord {
        /// Parent record path
        parent: String,
        /// Id of the new record
        id: String,
        #[arg(long, default_value = "_primary")]
        alt: String,
        /// Model, when it differs from the one the parent implies
        #[arg(long)]
        model: Option<String>,
        /// Initial field
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
    },
    /// Add files as attachments of a record
    Upload {
        #[command(flatten)]
        record: RecordArgs,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Delete a record or attachment
    Delete {
        #[command(flatten)]
        record: RecordArgs,
        /// Only remove the content file of --alt
        #[arg(long)]
        alt_only: bool,
    },
    /// Publish the output directory to a configured server
    Publish {
        /// Server id (defaults to the server marked default)
        server: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        key: Option<String>,
    },
    /// List configured publish targets
    Servers,
    /// Print the file backing a record in an alt
    SourcePath(RecordArgs),
    /// Print a stock project.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let site = Site::open_with(
        &cli.project,
        SiteOptions {
            output_dir: cli.output.clone(),
            ..SiteOptions::default()
        },
    )?;
    init_thread_pool(&site.config().processing);
    let json = cli.json;

    match cli.command {
        Command::Build => drain(site.build(), json)?,
        Command::Clean { all } => drain(site.clean(all), json)?,
        Command::Info(args) => {
            let info = site.get_record_info(&args.path, &args.alt)?;
            emit(json, &info, output::format_record_info)?;
        }
        Command::PathInfo { path } => {
            let info = site.get_path_info(&path)?;
            emit(json, &info, output::format_path_info)?;
        }
        Command::Preview(args) => {
            let info = site.get_preview_info(&args.path, &args.alt)?;
            emit(json, &info, |i| {
                let url = i.url.as_deref().unwrap_or("(no URL)");
                let hidden = if i.is_hidden { " (hidden)" } else { "" };
                vec![format!("{url}{hidden}")]
            })?;
        }
        Command::MatchUrl { url } => {
            let found = site.match_url(&url);
            emit(json, &found, |m| match (&m.path, &m.alt) {
                (Some(path), Some(alt)) => vec![format!("{path} ({alt})")],
                _ => vec!["No match".to_string()],
            })?;
        }
        Command::Find { query, alt, lang } => {
            let lang = lang.unwrap_or_else(|| site.config().project.locale.clone());
            let results = site.find(&query, &alt, &lang)?;
            emit(json, &results, output::format_find_results)?;
        }
        Command::RawGet(args) => {
            let record = site.get_raw_record(&args.path, &args.alt)?;
            emit(json, &record, output::format_raw_record)?;
        }
        Command::RawSet { record, set, unset } => {
            let mut data: BTreeMap<String, Option<String>> = BTreeMap::new();
            for assignment in &set {
                let (key, value) = parse_assignment(assignment)?;
                data.insert(key, Some(value));
            }
            for key in unset {
                data.insert(key, None);
            }
            let changed = site.set_raw_record(&record.path, &record.alt, &data)?;
            println!("{}", if changed { "Updated" } else { "Unchanged" });
        }
        Command::NewRecord {
            parent,
            id,
            alt,
            model,
            set,
        } => {
            let data = set
                .iter()
                .map(|a| parse_assignment(a))
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            let outcome = site.create_record(&parent, &id, &alt, model.as_deref(), &data)?;
            emit(json, &outcome, |o| match (&o.path, o.valid_id, o.exists) {
                (_, false, _) => vec![format!("'{id}' is not a valid id")],
                (Some(path), true, true) => vec![format!("{path} already exists")],
                (Some(path), true, false) => vec![format!("Created {path}")],
                (None, true, _) => vec![],
            })?;
        }
        Command::Upload { record, files } => {
            let uploads = files
                .iter()
                .map(|path| {
                    Ok(Upload {
                        filename: path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        data: std::fs::read(path)?,
                    })
                })
                .collect::<Result<Vec<_>, std::io::Error>>()?;
            let outcome = site.upload_attachment(&record.path, &record.alt, &uploads)?;
            if outcome.bad_upload {
                return Err(format!("upload to {} was rejected", outcome.path).into());
            }
            println!("Uploaded {} files to {}", uploads.len(), outcome.path);
        }
        Command::Delete { record, alt_only } => {
            let scope = if alt_only {
                DeleteScope::AltOnly
            } else {
                DeleteScope::AllAlts
            };
            let outcome = site.delete_record(&record.path, &record.alt, scope)?;
            println!("{}", if outcome.okay { "Deleted" } else { "Nothing to delete" });
        }
        Command::Publish {
            server,
            username,
            password,
            key,
        } => {
            let server = server
                .or_else(|| site.default_publish_target().map(str::to_string))
                .ok_or("no publish target given and none is marked default")?;
            let credentials = Credentials {
                username,
                password,
                key,
            };
            drain(site.publish(&server, &credentials)?, json)?;
        }
        Command::Servers => {
            let list = site.list_publish_targets();
            emit(json, &list, output::format_server_list)?;
        }
        Command::SourcePath(args) => {
            let path = site.source_path(&args.path, &args.alt)?;
            println!("{}", path.display());
        }
        // Printed before the project is opened
        Command::GenConfig => {}
    }

    Ok(())
}

/// Initialise tracing on stderr.
///
/// Uses `RUST_LOG` if set, otherwise defaults based on verbosity flags.
fn init_logging(verbose: bool, quiet: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if quiet {
        EnvFilter::new("warn")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn emit<T: Serialize>(json: bool, value: &T, format: impl FnOnce(&T) -> Vec<String>) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        for line in format(value) {
            println!("{}", line);
        }
    }
    Ok(())
}

/// Print a progress stream; fails if it reported an error.
fn drain(events: impl Iterator<Item = ProgressEvent>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut errors = 0;
    for event in events {
        if event.msg().is_some_and(|m| m.starts_with("Error: ") || m.starts_with("failed ")) {
            errors += 1;
        }
        if json {
            print!("{}", event.to_frame());
        } else if let Some(line) = output::format_progress_event(&event) {
            println!("{}", line);
        }
    }
    if errors > 0 {
        return Err(format!("{errors} errors reported").into());
    }
    Ok(())
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{raw}'"))
}
