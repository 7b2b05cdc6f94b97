//! Configuration files and their validation rules.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::path::Path;

use searchnets_core::config::load_config_str;
use searchnets_core::{
    ConfigError, DataConfig, DatasetType, LossFunc, Method, NetName, OptimizerKind, SplitSize,
    TrainConfig, TrainParams, load_config,
};

const MINIMAL: &str = r#"
[data]
csv_file_in = "stims/alexnet_multiple_stims.csv"
train_size = 6400
val_size = 200
test_size = 3200
set_sizes = [1, 2, 4, 8]

[train]
net_name = "alexnet"
number_nets_to_train = 4
epochs_list = [1, 5, 10]
batch_size = 64
random_seed = 42
save_path = "results/alexnet"

[test]
test_results_save_path = "results/test"
"#;

/// Add keys to the `[train]` section of [`MINIMAL`].
fn with_train(extra: &str) -> String {
    MINIMAL.replace("random_seed = 42\n", &format!("random_seed = 42\n{extra}\n"))
}

#[test]
fn test_minimal_file_gets_defaults() {
    let config = load_config_str(MINIMAL).unwrap();
    let data = config.data();
    assert_eq!(data.dataset_type(), DatasetType::Searchstims);
    assert_eq!(
        data.csv_file_out(),
        Path::new("stims/alexnet_multiple_stims.csv_split.csv")
    );
    assert_eq!(data.set_sizes(), Some(&[1, 2, 4, 8][..]));

    let train = config.train();
    assert_eq!(train.net_name(), NetName::Alexnet);
    assert_eq!(train.epochs_list(), &[1, 5, 10]);
    assert_eq!(train.method(), Method::Transfer);
    assert_eq!(train.loss_func(), LossFunc::Ce);
    assert_eq!(train.optimizer(), OptimizerKind::Sgd);
    assert_eq!(train.learning_rate(), TrainConfig::DEFAULT_LEARNING_RATE);
    assert!(!train.use_val());
    assert!(config.learncurve().is_none());
}

#[test]
fn test_file_on_disk_with_bare_epochs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let toml = MINIMAL
        .replace("epochs_list = [1, 5, 10]", "epochs_list = 7")
        .replace("net_name = \"alexnet\"", "net_name = \"CORnet_Z\"");
    std::fs::write(&path, toml).unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.train().epochs_list(), &[7]);
    assert_eq!(config.train().net_name(), NetName::CornetZ);
}

#[test]
fn test_missing_file() {
    let err = load_config(Path::new("/nonexistent/config.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Load { .. }));
}

#[test]
fn test_unknown_net_name_lists_choices() {
    let toml = MINIMAL.replace("net_name = \"alexnet\"", "net_name = \"resnet\"");
    let err = load_config_str(&toml).unwrap_err();
    match err {
        ConfigError::InvalidChoice { value, expected, .. } => {
            assert_eq!(value, "resnet");
            assert!(expected.contains("VGG16"));
        }
        other => panic!("expected InvalidChoice, got {other:?}"),
    }
}

#[test]
fn test_use_val_needs_val_epoch() {
    let toml = with_train("use_val = true");
    assert!(matches!(
        load_config_str(&toml),
        Err(ConfigError::Inconsistent { .. })
    ));

    let toml = with_train("use_val = true\nval_epoch = 2");
    let config = load_config_str(&toml).unwrap();
    assert_eq!(config.train().val_epoch(), Some(2));
}

#[test]
fn test_float_and_int_sizes_do_not_mix() {
    let toml = MINIMAL.replace("train_size = 6400", "train_size = 0.5");
    assert!(matches!(
        load_config_str(&toml),
        Err(ConfigError::Inconsistent { .. })
    ));
}

#[test]
fn test_learncurve_section() {
    let toml = format!("{MINIMAL}\n[learncurve]\ntrain_size_list = [100, 200, 400]\n");
    let config = load_config_str(&toml).unwrap();
    assert_eq!(
        config.learncurve().unwrap().train_size_list(),
        &[100, 200, 400]
    );

    let toml = format!("{MINIMAL}\n[learncurve]\ntrain_size_list = [100, -1]\n");
    assert!(load_config_str(&toml).is_err());
}

#[test]
fn test_rendered_config_reloads() {
    let config = load_config_str(MINIMAL).unwrap();
    let rendered = config.to_toml_string().unwrap();
    assert_eq!(load_config_str(&rendered).unwrap(), config);
}

#[test]
fn test_train_params_follow_config() {
    let toml = with_train("method = \"initialize\"\nloss_func = \"BCE\"");
    let config = load_config_str(&toml).unwrap();
    let params = TrainParams::from(&config);
    assert_eq!(
        params.csv_file,
        Path::new("stims/alexnet_multiple_stims.csv_split.csv")
    );
    assert_eq!(params.method, Method::Initialize);
    assert_eq!(params.loss_func, LossFunc::Bce);
    assert_eq!(params.random_seed, Some(42));
    assert!(!params.use_val);
    assert_eq!(params.validate().unwrap(), vec![1, 5, 10]);
}

proptest! {
    #[test]
    fn prop_proportions_summing_past_one_rejected(
        train in 0.0f64..1.0,
        val in 0.0f64..1.0,
        test in 0.0f64..1.0,
    ) {
        let result = DataConfig::builder("stims.csv", SplitSize::Proportion(train))
            .val_size(SplitSize::Proportion(val))
            .test_size(SplitSize::Proportion(test))
            .build();
        let total = train + val + test;
        if total > 1.0 + 1e-6 {
            prop_assert!(matches!(result, Err(ConfigError::Inconsistent { .. })), "expected ConfigError::Inconsistent, got {:?}", result);
        } else if total <= 1.0 {
            prop_assert!(result.is_ok());
        }
    }

    #[test]
    fn prop_counts_and_proportions_never_mix(count in 1u64..10_000, proportion in 0.01f64..1.0) {
        let result = DataConfig::builder("stims.csv", SplitSize::Count(count))
            .val_size(SplitSize::Proportion(proportion))
            .build();
        prop_assert!(matches!(result, Err(ConfigError::Inconsistent { .. })), "expected ConfigError::Inconsistent, got {:?}", result);
    }

    #[test]
    fn prop_default_csv_file_out_appends_suffix(stem in "[a-z][a-z0-9_]{0,12}") {
        let csv_in = format!("{stem}.csv");
        let config = DataConfig::builder(&csv_in, SplitSize::Count(10)).build().unwrap();
        let expected = format!("{csv_in}_split.csv");
        prop_assert_eq!(config.csv_file_out(), Path::new(&expected));
    }

    #[test]
    fn prop_patience_requires_validation(patience in 1u32..100, use_val in any::<bool>()) {
        let result = TrainConfig::builder(NetName::Vgg16, 1, vec![1], 8, 0, "results")
            .use_val(use_val)
            .val_epoch(1)
            .patience(patience)
            .build();
        prop_assert_eq!(result.is_ok(), use_val);
    }

    #[test]
    fn prop_epoch_budgets_must_be_positive_and_distinct(
        epochs in prop::collection::vec(0u32..5, 1..6),
    ) {
        let result = TrainConfig::builder(NetName::Alexnet, 1, epochs.clone(), 8, 0, "results").build();
        let mut unique = epochs.clone();
        unique.sort_unstable();
        unique.dedup();
        let valid = epochs.iter().all(|&e| e > 0) && unique.len() == epochs.len();
        prop_assert_eq!(result.is_ok(), valid);
    }
}
