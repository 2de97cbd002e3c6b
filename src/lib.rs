pub mod artifacts;
pub mod baselines;
pub mod cv;
pub mod data;
pub mod distrib;
pub mod evaluator;
pub mod folds;
pub mod ga;
pub mod hof;
pub mod hyperbox;
pub mod individual;
pub mod lifter;
pub mod mask;
pub mod measures;
pub mod objective;
pub mod param;
pub mod predictor;
pub mod prefilter;
pub mod registry;
pub mod sorting;
pub mod utils;

use chrono::Local;
use log::info;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::data::InputData;
use crate::param::{DataParam, Param};

/// Crate version plus the git revision baked in at build time.
pub fn version() -> String {
    format!(
        "{}#{}",
        env!("CARGO_PKG_VERSION"),
        option_env!("PARETOMICS_GIT_SHA").unwrap_or("unknown")
    )
}

/// Execute one full setup: load the dataset, run the nested
/// cross-validation into a fresh timestamped run directory, and when an
/// external cohort is configured, validate the persisted fronts against it.
///
/// Returns the run directory so callers can locate the artifacts.
pub fn run_one_setup(param: &Param, running: Arc<AtomicBool>) -> Result<PathBuf, Box<dyn Error>> {
    let start = std::time::Instant::now();
    let data = InputData::load(&param.data)?;
    cinfo!(param.general.display_colorful, "\x1b[2;97m{:?}\x1b[0m", data);

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let run_dir = Path::new(&param.general.outdir).join(format!(
        "{}_{:?}_{}",
        data.nick, param.general.algorithm, timestamp
    ));
    std::fs::create_dir_all(&run_dir)?;
    info!("run directory: {}", run_dir.display());

    cv::run(&data, param, running, &run_dir)?;

    if has_external(&param.data) {
        let external = InputData::load(&external_data_param(&param.data))?;
        cv::external_validation(&data, &external, param, &run_dir)?;
    }

    cinfo!(
        param.general.display_colorful,
        "Setup '{}' completed in {:.2}s",
        data.nick,
        start.elapsed().as_secs_f64()
    );
    Ok(run_dir)
}

/// Validate the persisted fronts of an existing run directory against the
/// configured external cohort, without re-running the optimizer.
pub fn run_one_external_validation(param: &Param, run_dir: &Path) -> Result<(), Box<dyn Error>> {
    if !has_external(&param.data) {
        return Err("no external dataset configured".into());
    }
    let data = InputData::load(&param.data)?;
    let external = InputData::load(&external_data_param(&param.data))?;
    cv::external_validation(&data, &external, param, run_dir)
}

fn has_external(data_param: &DataParam) -> bool {
    !data_param.external_views.is_empty() && !data_param.external_outcome_file.is_empty()
}

/// The external cohort shares the outcome schema and stratification of the
/// primary dataset, only its files differ.
fn external_data_param(data_param: &DataParam) -> DataParam {
    DataParam {
        dataset: if data_param.external_dataset.is_empty() {
            format!("{}_external", data_param.dataset)
        } else {
            data_param.external_dataset.clone()
        },
        external_dataset: String::new(),
        views: data_param.external_views.clone(),
        external_views: Vec::new(),
        outcome_file: data_param.external_outcome_file.clone(),
        external_outcome_file: String::new(),
        outcomes: data_param.outcomes.clone(),
        stratify_outcome: data_param.stratify_outcome.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_carries_the_crate_version() {
        assert!(version().starts_with(env!("CARGO_PKG_VERSION")));
        assert!(version().contains('#'));
    }

    #[test]
    fn test_external_data_param_swaps_the_files() {
        let mut data_param = DataParam::default();
        data_param.dataset = "qin2014".to_string();
        data_param.views = vec![param::ViewSpec {
            name: "taxa".to_string(),
            path: "taxa.tsv".to_string(),
        }];
        data_param.external_views = vec![param::ViewSpec {
            name: "taxa".to_string(),
            path: "taxa_ext.tsv".to_string(),
        }];
        data_param.outcome_file = "y.tsv".to_string();
        data_param.external_outcome_file = "y_ext.tsv".to_string();
        assert!(has_external(&data_param));

        let external = external_data_param(&data_param);
        assert_eq!(external.dataset, "qin2014_external");
        assert_eq!(external.views[0].path, "taxa_ext.tsv");
        assert_eq!(external.outcome_file, "y_ext.tsv");
        assert!(external.external_views.is_empty());
    }
}
