use std::{error::Error, fs::File, path::Path, path::PathBuf};

use boostscope::{
    booster::Booster,
    callback::{CallbackAction, CallbackError, EvaluationLog, TrainingCallback},
    download::{self, ABALONE_URL},
    evaluate,
    hook::{parse_collections, Collection, Hook, HookConfig, HookError, SaveConfig, TensorFormat},
    objective::Objective,
    split::{DEFAULT_SEED, DEFAULT_TRAIN_SPLIT},
    train, BoosterParams, DataMatrix, EarlyStopping, EvalSet,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};

/// Train a gradient-boosted regression model on the abalone dataset (or the provided LIBSVM files)
/// while a debug hook saves training tensors to a local directory.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Cli {
    /// maximum depth of each tree
    #[arg(long = "max_depth", alias = "max-depth", default_value = "5")]
    max_depth: usize,

    /// step size shrinkage applied to each tree's leaf weights
    #[arg(long, default_value = "0.2")]
    eta: f64,

    /// minimum loss reduction required to keep a split
    #[arg(long, default_value = "4")]
    gamma: f64,

    /// minimum sum of hessians required in each child
    #[arg(long = "min_child_weight", alias = "min-child-weight", default_value = "6")]
    min_child_weight: f64,

    /// fraction of rows sampled for each tree
    #[arg(long, default_value = "0.7")]
    subsample: f64,

    /// 1 to suppress the progress bar and per-round output
    #[arg(long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=1))]
    silent: u8,

    /// the learning objective, e.g. reg:squarederror or count:poisson
    #[arg(long, default_value = "reg:squarederror")]
    objective: Objective,

    /// number of boosting rounds; each round is one hook step
    #[arg(long = "num_round", alias = "num-round", default_value = "50")]
    num_round: usize,

    /// directory the hook writes tensors to. Takes precedence over --output_uri and the hook config
    #[arg(long = "smdebug_path", alias = "smdebug-path")]
    smdebug_path: Option<PathBuf>,

    /// save tensors every this many steps [default: 1, or the hook config's schedule]
    #[arg(long = "smdebug_frequency", alias = "smdebug-frequency")]
    smdebug_frequency: Option<usize>,

    /// comma-separated collections to save, e.g. metrics,feature_importance [default: metrics, or the hook config's list]
    #[arg(long = "smdebug_collections", alias = "smdebug-collections", value_delimiter = ',')]
    smdebug_collections: Option<Vec<String>>,

    /// directory tensors are written to when --smdebug_path is not given
    #[arg(long = "output_uri", alias = "output-uri", default_value = "/opt/ml/output/tensors")]
    output_uri: PathBuf,

    /// LIBSVM training file or directory. If this or --validation is missing, the dataset is downloaded and split
    #[arg(long, env = "SM_CHANNEL_TRAIN")]
    train: Option<PathBuf>,

    /// LIBSVM validation file or directory
    #[arg(long, env = "SM_CHANNEL_VALIDATION")]
    validation: Option<PathBuf>,

    /// stop when the validation metric hasn't improved for this many rounds. 0 disables early stopping
    #[arg(long = "early_stopping_rounds", alias = "early-stopping-rounds", default_value = "0")]
    early_stopping_rounds: usize,

    /// seed for the train/validation split and for row sampling
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// fraction of the downloaded dataset used for training
    #[arg(long = "train_split", alias = "train-split", default_value_t = DEFAULT_TRAIN_SPLIT)]
    train_split: f64,

    /// where to download the LIBSVM dataset from when no data files are given
    #[arg(long = "dataset_url", alias = "dataset-url", default_value = ABALONE_URL)]
    dataset_url: String,

    /// encoding of the hook's event files: json or cbor [default: json]
    #[arg(long = "tensor_format", alias = "tensor-format")]
    tensor_format: Option<TensorFormat>,

    /// JSON file with the hook's output directory, schedule, and collections. Command-line flags take precedence
    #[arg(long = "hook_config", alias = "hook-config", env = "BOOSTSCOPE_HOOK_CONFIG")]
    hook_config: Option<PathBuf>,

    /// path to the output file for the trained model. Supported file extensions are .json and .cbor (and .pkl with the `serialization` feature)
    #[arg(short = 'o', long = "model_out", alias = "model-out")]
    model_out: Option<PathBuf>,

    /// log training output to stdout in addition to drawing on the terminal, allowing output to be piped
    #[arg(long = "log_output", alias = "log-output")]
    log_output: bool,
}

impl Cli {
    fn booster_params(&self) -> BoosterParams {
        BoosterParams {
            max_depth: self.max_depth,
            eta: self.eta,
            gamma: self.gamma,
            min_child_weight: self.min_child_weight,
            subsample: self.subsample,
            objective: self.objective,
            seed: self.seed,
            silent: self.silent == 1,
            ..Default::default()
        }
    }
}

/// Where and what the hook saves, after merging the command line with the hook config
#[derive(Debug, Clone, PartialEq)]
struct HookSettings {
    out_dir: PathBuf,
    save_config: SaveConfig,
    collections: Vec<Collection>,
    format: TensorFormat,
}

fn hook_settings(cli: &Cli, config: &HookConfig) -> Result<HookSettings, HookError> {
    let out_dir = cli
        .smdebug_path
        .clone()
        .or_else(|| config.out_dir.clone())
        .unwrap_or_else(|| cli.output_uri.clone());
    let save_config = match cli.smdebug_frequency {
        Some(frequency) => SaveConfig::every(frequency),
        None => config.save_config.clone().unwrap_or_default(),
    };
    let collections = match &cli.smdebug_collections {
        Some(names) => parse_collections(names)?,
        None => config.collections()?,
    };
    let format = cli.tensor_format.or(config.tensor_format).unwrap_or_default();
    Ok(HookSettings {
        out_dir,
        save_config,
        collections,
        format,
    })
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();
    debug!("Using arguments {cli:?}");

    // check the output file extension to make sure we can save it later. If not, better to fail now than after training
    if let Some(model_out) = &cli.model_out {
        validate_output_file_extension(model_out)?;
    }
    let params = cli.booster_params();
    params.validate()?;

    // the split files must outlive training; they're deleted when dropped
    let mut _split_files = None;
    let (train_path, validation_path) = match (&cli.train, &cli.validation) {
        (Some(train), Some(validation)) => (train.clone(), validation.clone()),
        _ => {
            let files = download::load_libsvm_dataset(&cli.dataset_url, cli.train_split, cli.seed)?;
            let paths = (files.train_path().to_path_buf(), files.validation_path().to_path_buf());
            _split_files = Some(files);
            paths
        }
    };
    let mut dtrain = DataMatrix::from_libsvm_path(&train_path)?;
    let mut dval = DataMatrix::from_libsvm_path(&validation_path)?;
    let num_features = dtrain.num_features().max(dval.num_features());
    dtrain.pad_features(num_features);
    dval.pad_features(num_features);
    println!(
        "Data loaded. Training: {}, Validation: {}, Features: {}",
        dtrain.num_rows(),
        dval.num_rows(),
        num_features
    );

    let hook_config = match &cli.hook_config {
        Some(path) => HookConfig::from_path(path)?,
        None => HookConfig::default(),
    };
    let settings = hook_settings(&cli, &hook_config)?;
    let mut hook = Hook::builder(&settings.out_dir)
        .save_config(settings.save_config)
        .collections(settings.collections)
        .tensor_format(settings.format)
        .train_data(&dtrain)
        .validation_data(&dval)
        .build()?;
    info!(
        "saving collections [{}] to {}",
        hook.collections()
            .iter()
            .map(|c| c.name.to_string())
            .collect::<Vec<String>>()
            .join(", "),
        hook.out_dir().display()
    );

    let mut progress = TrainingProgress::new(cli.num_round as u64, cli.log_output, params.silent);
    let mut early_stopping = (cli.early_stopping_rounds > 0).then(|| EarlyStopping::new(cli.early_stopping_rounds));
    let mut callbacks: Vec<&mut dyn TrainingCallback> = Vec::new();
    callbacks.push(&mut hook);
    callbacks.push(&mut progress);
    if let Some(early_stopping) = early_stopping.as_mut() {
        callbacks.push(early_stopping);
    }

    let watchlist = [EvalSet::new("train", &dtrain), EvalSet::new("validation", &dval)];
    let booster = train(&params, &dtrain, &watchlist, cli.num_round, &mut callbacks)?;
    drop(callbacks);

    if let Some(early_stopping) = &early_stopping {
        println!(
            "{} Best round: {} ({})",
            chrono::Local::now(),
            early_stopping.best_iteration(),
            early_stopping.best_value().unwrap_or(f64::NAN)
        );
    }
    for (metric, value) in evaluate(&booster, &dval, &params.metrics()) {
        println!("{} Final validation-{}: {}", chrono::Local::now(), metric, value);
    }
    println!("Tensors saved to {}", hook.out_dir().display());

    if let Some(model_out) = &cli.model_out {
        serialize_model(model_out, &booster)?;
    }
    Ok(())
}

fn serialize_model(model_output_file: &Path, booster: &Booster) -> Result<(), Box<dyn Error>> {
    println!("Saving model to file: {:?}", model_output_file);
    let extension = validate_output_file_extension(model_output_file)?;
    let mut out_file = File::create(model_output_file)?;
    match extension {
        #[cfg(feature = "serialization")]
        "pkl" => serde_pickle::to_writer(&mut out_file, booster, Default::default())?,
        "json" => serde_json::to_writer(&mut out_file, booster)?,
        "cbor" => ciborium::into_writer(booster, &mut out_file)?,
        _ => unreachable!("extension validated above"),
    }
    Ok(())
}

#[cfg(feature = "serialization")]
const SUPPORTED_EXTENSIONS: &[&str] = &["json", "cbor", "pkl"];
#[cfg(not(feature = "serialization"))]
const SUPPORTED_EXTENSIONS: &[&str] = &["json", "cbor"];

/// the extension of `output_file_path`, if it names a format the model can be saved in
fn validate_output_file_extension(output_file_path: &Path) -> Result<&'static str, String> {
    let extension = output_file_path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| {
            format!(
                "No file extension found for output file {:?} - unable to determine output format",
                output_file_path
            )
        })?;
    SUPPORTED_EXTENSIONS
        .iter()
        .copied()
        .find(|supported| *supported == extension)
        .ok_or_else(|| {
            format!(
                "Unsupported file extension: {}. Supported extensions are: {}",
                extension,
                SUPPORTED_EXTENSIONS.join(", ")
            )
        })
}

struct TrainingProgress {
    pb: ProgressBar,
    should_log: bool,
}

impl TrainingProgress {
    fn new(total: u64, should_log: bool, silent: bool) -> Self {
        let pb = if silent {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total)
        };
        // the template is a constant, so the only failure mode is a typo in it
        if let Ok(style) = ProgressStyle::default_bar().template(
            "[{elapsed_precise}] [{bar:40.green/white}] {human_pos}/{human_len} {per_sec} ({eta}) {msg}",
        ) {
            pb.set_style(style);
        }
        TrainingProgress {
            pb,
            should_log: should_log && !silent,
        }
    }
}

impl TrainingCallback for TrainingProgress {
    fn after_iteration(
        &mut self,
        _booster: &Booster,
        iteration: usize,
        evals_log: &EvaluationLog,
    ) -> Result<CallbackAction, CallbackError> {
        self.pb.inc(1);
        let metrics = evals_log
            .latest()
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect::<Vec<String>>()
            .join(", ");
        let line = format!("{} Round {}: {}", chrono::Local::now(), iteration, metrics);
        self.pb.println(&line);
        if self.should_log {
            println!("{}", line);
        }
        Ok(CallbackAction::Continue)
    }

    fn after_training(&mut self, _booster: &Booster) -> Result<(), CallbackError> {
        self.pb.finish_with_message("Training complete");
        Ok(())
    }
}

#[cfg(test)]
mod test_main {
    use super::*;

    use boostscope::hook::{CollectionConfig, CollectionName};
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["boostscope", "--train", "train.libsvm", "--validation", "val.libsvm"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn trained_booster() -> Booster {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let labels: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let data = DataMatrix::from_dense(&rows, labels);
        train(&BoosterParams::default(), &data, &[], 3, &mut []).unwrap()
    }

    #[test]
    fn test_defaults_match_demo() {
        let cli = parse(&[]);
        let params = cli.booster_params();
        assert_eq!(params.max_depth, 5);
        assert_eq!(params.eta, 0.2);
        assert_eq!(params.gamma, 4.0);
        assert_eq!(params.min_child_weight, 6.0);
        assert_eq!(params.subsample, 0.7);
        assert_eq!(params.objective, Objective::SquaredError);
        assert!(!params.silent);
        assert_eq!(cli.num_round, 50);
        assert_eq!(cli.output_uri, PathBuf::from("/opt/ml/output/tensors"));
        assert_eq!(cli.seed, 42);
        assert_eq!(cli.train_split, 0.8);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_kebab_aliases() {
        let cli = parse(&["--max-depth", "3", "--num-round", "7", "--smdebug-frequency", "2"]);
        assert_eq!(cli.max_depth, 3);
        assert_eq!(cli.num_round, 7);
        assert_eq!(cli.smdebug_frequency, Some(2));
    }

    #[test]
    fn test_rejects_bad_values() {
        let base = ["boostscope", "--train", "t", "--validation", "v"];
        let with = |extra: &[&str]| {
            let mut argv = base.to_vec();
            argv.extend_from_slice(extra);
            Cli::try_parse_from(argv)
        };
        assert!(with(&["--silent", "2"]).is_err());
        assert!(with(&["--objective", "reg:linear"]).is_err());
        assert!(with(&["--tensor_format", "protobuf"]).is_err());
        assert!(with(&["--objective", "count:poisson"]).is_ok());
    }

    #[test]
    fn test_hook_settings_from_flags() {
        let cli = parse(&[
            "--smdebug_path",
            "/tmp/run",
            "--smdebug_frequency",
            "5",
            "--smdebug_collections",
            "metrics,feature_importance",
            "--tensor_format",
            "cbor",
        ]);
        let settings = hook_settings(&cli, &HookConfig::default()).unwrap();
        assert_eq!(settings.out_dir, PathBuf::from("/tmp/run"));
        assert_eq!(settings.save_config, SaveConfig::every(5));
        let names: Vec<CollectionName> = settings.collections.iter().map(|c| c.name).collect();
        assert_eq!(names, vec![CollectionName::Metrics, CollectionName::FeatureImportance]);
        assert_eq!(settings.format, TensorFormat::Cbor);
    }

    #[test]
    fn test_hook_settings_defaults() {
        let settings = hook_settings(&parse(&[]), &HookConfig::default()).unwrap();
        assert_eq!(settings.out_dir, PathBuf::from("/opt/ml/output/tensors"));
        assert_eq!(settings.save_config, SaveConfig::default());
        assert_eq!(settings.save_config.interval(), Some(1));
        // the hook falls back to its default collections
        assert!(settings.collections.is_empty());
        assert_eq!(settings.format, TensorFormat::Json);
    }

    #[test]
    fn test_hook_config_fills_unset_flags() {
        let config = HookConfig {
            out_dir: Some(PathBuf::from("/tmp/from-config")),
            save_config: Some(SaveConfig::every(10)),
            collections: vec![CollectionConfig {
                name: "trees".to_string(),
                save_config: None,
            }],
            tensor_format: Some(TensorFormat::Cbor),
        };
        let settings = hook_settings(&parse(&[]), &config).unwrap();
        assert_eq!(settings.out_dir, PathBuf::from("/tmp/from-config"));
        assert_eq!(settings.save_config, SaveConfig::every(10));
        assert_eq!(settings.collections, vec![Collection::new(CollectionName::Trees)]);

        let cli = parse(&["--smdebug_path", "/tmp/flag", "--smdebug_frequency", "3"]);
        let settings = hook_settings(&cli, &config).unwrap();
        assert_eq!(settings.out_dir, PathBuf::from("/tmp/flag"));
        assert_eq!(settings.save_config, SaveConfig::every(3));
    }

    #[test]
    fn test_unknown_collection_flag() {
        let cli = parse(&["--smdebug_collections", "metrics,weights"]);
        assert!(matches!(
            hook_settings(&cli, &HookConfig::default()),
            Err(HookError::UnknownCollection { .. })
        ));
    }

    #[test]
    fn test_output_extension_validation() {
        assert_eq!(validate_output_file_extension(Path::new("model.json")), Ok("json"));
        assert_eq!(validate_output_file_extension(Path::new("model.cbor")), Ok("cbor"));
        assert!(validate_output_file_extension(Path::new("model.avro")).is_err());
        assert!(validate_output_file_extension(Path::new("model")).is_err());
    }

    #[test]
    fn test_save_json_model() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("model.json");
        let booster = trained_booster();
        serialize_model(&path, &booster).unwrap();
        let loaded: Booster = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(loaded, booster);
    }

    #[test]
    fn test_save_cbor_model() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("model.cbor");
        let booster = trained_booster();
        serialize_model(&path, &booster).unwrap();
        let loaded: Booster = ciborium::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(loaded, booster);
    }

    #[cfg(feature = "serialization")]
    #[test]
    fn test_save_pickle_model() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("model.pkl");
        let booster = trained_booster();
        serialize_model(&path, &booster).unwrap();
        let loaded: Booster = serde_pickle::from_reader(File::open(&path).unwrap(), Default::default()).unwrap();
        assert_eq!(loaded, booster);
    }
}
