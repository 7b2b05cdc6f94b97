//! CLI subcommand handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use searchnets_core::{
    Config, JobPlan, Orchestrator, ProbeFactory, StandardTransforms, TrainParams, load_config,
};

/// Matches the input size of the ImageNet-trained architectures.
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

pub fn load(path: &Path) -> anyhow::Result<Config> {
    load_config(path).map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", path.display(), e))
}

/// Pretrained weights live in the per-user data directory unless a directory
/// is given on the command line.
fn pretrained_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        directories::ProjectDirs::from("org", "searchnets", "searchnets")
            .map(|d| d.data_dir().join("pretrained"))
            .unwrap_or_else(|| PathBuf::from("pretrained"))
    })
}

pub fn train(config: &Config, pretrained: Option<PathBuf>, image_size: u32) -> anyhow::Result<()> {
    if image_size == 0 {
        anyhow::bail!("--image-size must be positive");
    }
    let input_dim = 3 * (image_size as usize) * (image_size as usize);
    let factory = ProbeFactory::new(input_dim).with_pretrained_dir(pretrained_dir(pretrained));
    let transforms = StandardTransforms::new(image_size).with_seed(config.train().random_seed());

    tracing::info!(
        net = %config.train().net_name(),
        method = %config.train().method(),
        image_size,
        save_path = %config.train().save_path().display(),
        "starting training run"
    );
    let orchestrator = Orchestrator::new(Arc::new(factory), Arc::new(transforms));
    let reports = orchestrator.run_config(config)?;

    for report in &reports {
        let last_loss = report
            .metrics
            .last_loss()
            .map(|l| format!("{l:.4}"))
            .unwrap_or_else(|| "n/a".to_string());
        let best = report
            .metrics
            .best_val_acc
            .map(|a| format!("{a:.4}"))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "{}  epochs={} loss={} best_val_acc={}{}",
            report.save_path.display(),
            report.metrics.epochs_completed,
            last_loss,
            best,
            if report.stopped_early { " (stopped early)" } else { "" },
        );
    }
    println!("Trained {} network(s).", reports.len());
    Ok(())
}

pub fn check(config: &Config) -> anyhow::Result<()> {
    println!("{}", config.to_toml_string()?);

    let params = TrainParams::from(config);
    let plan = JobPlan::for_params(&params)?;
    println!("Job plan ({} jobs):", plan.len());
    for job in plan.jobs() {
        println!(
            "  replicate {:>3}  epochs {:>4}  {}",
            job.replicate,
            job.epochs,
            job.save_path.display()
        );
    }
    Ok(())
}
