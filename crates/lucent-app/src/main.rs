//! Lucent command line (native).
//!
//! Loads a JSON scene, renders its glass elements and writes the baked
//! fills out as PNG files.

#[cfg(feature = "native")]
mod cli {
    use clap::{Parser, Subcommand};
    use lucent_app::{AppConfig, BatchOutcome, ConfigError, CycleError, SyncCoordinator};
    use lucent_core::{MemoryScene, NodeId, SceneError, SceneHost};
    use lucent_render::{encode_png, CompositorError};
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::process::ExitCode;
    use thiserror::Error;

    #[derive(Parser, Debug)]
    #[command(name = "lucent", about = "Render liquid-glass elements of a scene")]
    pub struct Cli {
        /// Coordinator configuration (JSON).
        #[arg(long, global = true, value_name = "FILE")]
        config: Option<PathBuf>,

        #[command(subcommand)]
        command: Command,
    }

    #[derive(Subcommand, Debug)]
    enum Command {
        /// Render one glass element.
        Render {
            #[arg(long, value_name = "SCENE.json")]
            scene: PathBuf,
            /// Node name or id.
            #[arg(long)]
            node: String,
            #[arg(long, value_name = "FILE.png")]
            out: PathBuf,
        },
        /// Render every glass element on the page.
        Batch {
            #[arg(long, value_name = "SCENE.json")]
            scene: PathBuf,
            #[arg(long, value_name = "DIR")]
            out_dir: PathBuf,
        },
    }

    #[derive(Debug, Error)]
    enum CliError {
        #[error(transparent)]
        Config(#[from] ConfigError),
        #[error(transparent)]
        Scene(#[from] SceneError),
        #[error(transparent)]
        Compositor(#[from] CompositorError),
        #[error(transparent)]
        Cycle(#[from] CycleError),
        #[error("Failed to write output: {0}")]
        Io(#[from] std::io::Error),
        #[error("No node named {0}")]
        UnknownNode(String),
        #[error("Batch did not complete: {0:?}")]
        Batch(BatchOutcome),
    }

    pub fn parse() -> (Cli, Result<AppConfig, ConfigError>) {
        let cli = Cli::parse();
        let config = match &cli.config {
            Some(path) => AppConfig::load(path),
            None => Ok(AppConfig::default()),
        };
        (cli, config)
    }

    pub async fn run(cli: Cli, config: AppConfig) -> ExitCode {
        match execute(cli.command, config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("{}", e);
                ExitCode::FAILURE
            }
        }
    }

    fn load_scene(path: &Path) -> Result<MemoryScene, CliError> {
        let json = std::fs::read_to_string(path)?;
        Ok(MemoryScene::from_json(&json)?)
    }

    fn resolve(scene: &MemoryScene, node: &str) -> Result<NodeId, CliError> {
        node.parse::<NodeId>()
            .ok()
            .filter(|id| scene.node(*id).is_some())
            .or_else(|| scene.find_by_name(node))
            .ok_or_else(|| CliError::UnknownNode(node.to_string()))
    }

    /// File stem for a node's fill. Node names are user text, so anything
    /// that could leave the output directory is replaced.
    fn output_name(name: &str, id: NodeId) -> String {
        let cleaned: String = name
            .trim()
            .chars()
            .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | ' ') { c } else { '_' })
            .collect();
        if cleaned.chars().all(|c| c == '_' || c == ' ') {
            id.to_string()
        } else {
            cleaned
        }
    }

    fn write_fill(scene: &MemoryScene, node: NodeId, path: &Path) -> Result<(), CliError> {
        let Some(image) = scene.fill_image(node) else {
            return Ok(());
        };
        std::fs::write(path, encode_png(&image)?)?;
        log::info!("Wrote {}", path.display());
        Ok(())
    }

    async fn execute(command: Command, config: AppConfig) -> Result<(), CliError> {
        match command {
            Command::Render { scene, node, out } => {
                let scene = load_scene(&scene)?;
                let node = resolve(&scene, &node)?;
                let (mut coordinator, _handle) = SyncCoordinator::new(&scene, &scene, config)?;
                coordinator.render_node(node).await?;
                write_fill(&scene, node, &out)
            }
            Command::Batch { scene, out_dir } => {
                let scene = load_scene(&scene)?;
                let (mut coordinator, _handle) = SyncCoordinator::new(&scene, &scene, config)?;
                let report = coordinator.batch(Vec::new()).await;

                std::fs::create_dir_all(&out_dir)?;
                let mut used = HashSet::new();
                for node in scene.glass_nodes() {
                    let name = scene.node(node).map_or_else(String::new, |n| n.name);
                    let mut file = output_name(&name, node);
                    if !used.insert(file.clone()) {
                        file = format!("{}-{}", file, node);
                        used.insert(file.clone());
                    }
                    write_fill(&scene, node, &out_dir.join(format!("{}.png", file)))?;
                }
                match report.outcome {
                    BatchOutcome::Completed => Ok(()),
                    outcome => Err(CliError::Batch(outcome)),
                }
            }
        }
    }

}

#[cfg(feature = "native")]
fn main() -> std::process::ExitCode {
    let (cli, config) = cli::parse();
    let level = config.as_ref().map_or("info", |c| c.log_level.as_str()).to_string();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return std::process::ExitCode::FAILURE;
        }
    };
    log::info!("Starting Lucent");
    pollster::block_on(cli::run(cli, config))
}

#[cfg(not(feature = "native"))]
fn main() {
    panic!("Native feature not enabled. Use `cargo run --features native`");
}
