mod util;
use util::{json_event_file, saved_event_steps, synthetic_matrix, NUM_FEATURES};

use boostscope::{
    hook::{
        parse_collections, read_step_event, Collection, CollectionName, EventWriter, Hook, HookError, SaveConfig,
        writer::END_OF_JOB_FILE, TensorFormat,
    },
    train, BoosterParams, EvalSet,
};
use tempfile::tempdir;
use test_log::test;

#[test]
fn saves_metrics_at_frequency() {
    let tmp_dir = tempdir().unwrap();
    let out_dir = tmp_dir.path().join("tensors");
    let dtrain = synthetic_matrix(200, 11);
    let dval = synthetic_matrix(50, 12);

    let mut hook = Hook::builder(&out_dir)
        .save_config(SaveConfig::every(3))
        .train_data(&dtrain)
        .validation_data(&dval)
        .build()
        .unwrap();
    train(
        &BoosterParams::default(),
        &dtrain,
        &[EvalSet::new("train", &dtrain), EvalSet::new("validation", &dval)],
        10,
        &mut [&mut hook],
    )
    .unwrap();

    assert_eq!(hook.saved_steps(), &[0, 3, 6, 9]);
    assert_eq!(saved_event_steps(&out_dir), vec![0, 3, 6, 9]);
    assert!(out_dir.join(END_OF_JOB_FILE).exists());
    assert!(out_dir.join(EventWriter::collections_file()).exists());
    for step in [0, 3, 6, 9] {
        assert!(out_dir.join(EventWriter::index_file(step)).exists());
    }

    let event = read_step_event(&json_event_file(&out_dir, 6)).unwrap();
    assert_eq!(event.step, 6);
    assert_eq!(event.mode, "TRAIN");
    let names: Vec<&str> = event.tensors.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["train-rmse", "validation-rmse"]);
    let validation_rmse = event.tensor("validation-rmse").unwrap();
    assert_eq!(validation_rmse.collection, CollectionName::Metrics);
    assert_eq!(validation_rmse.shape, Vec::<usize>::new());
    assert!(validation_rmse.values[0] > 0.0);
}

#[test]
fn saves_every_collection() {
    let tmp_dir = tempdir().unwrap();
    let out_dir = tmp_dir.path().join("tensors");
    let dtrain = synthetic_matrix(120, 13);
    let dval = synthetic_matrix(40, 14);

    let collections = parse_collections(&[
        "hyperparameters",
        "metrics",
        "predictions",
        "labels",
        "feature_importance",
        "average_shap",
        "full_shap",
        "trees",
    ])
    .unwrap();
    let mut hook = Hook::builder(&out_dir)
        .save_config(SaveConfig::every(2))
        .collections(collections)
        .train_data(&dtrain)
        .validation_data(&dval)
        .build()
        .unwrap();
    let booster = train(
        &BoosterParams::default(),
        &dtrain,
        &[EvalSet::new("validation", &dval)],
        4,
        &mut [&mut hook],
    )
    .unwrap();
    assert_eq!(hook.saved_steps(), &[0, 2]);

    let first = read_step_event(&json_event_file(&out_dir, 0)).unwrap();
    assert!(first.tensor("hyperparameters/eta").is_some());
    let last = read_step_event(&json_event_file(&out_dir, 2)).unwrap();
    // hyperparameters are only saved once
    assert!(last.tensor("hyperparameters/eta").is_none());

    assert_eq!(last.tensor("predictions").unwrap().shape, vec![dval.num_rows()]);
    assert_eq!(last.tensor("labels").unwrap().values, dval.labels().to_vec());
    assert!(last.tensor("feature_importance/weight/f0").is_some());
    for column in ["f0", "f1", "f2", "bias"] {
        let average = last.tensor(&format!("average_shap/{}", column)).unwrap();
        assert!(average.values[0] >= 0.0);
        let full = last.tensor(&format!("full_shap/{}", column)).unwrap();
        assert_eq!(full.shape, vec![dtrain.num_rows()]);
    }
    assert!(last.tensor(&format!("full_shap/f{}", NUM_FEATURES)).is_none());

    // the tree table at step 2 covers the first three trees
    let tree_ids = &last.tensor("trees/Tree").unwrap().values;
    assert_eq!(tree_ids.first(), Some(&0.0));
    assert_eq!(tree_ids.last(), Some(&2.0));
    assert_eq!(booster.num_trees(), 4);
}

#[test]
fn per_collection_schedule_overrides_hook_schedule() {
    let tmp_dir = tempdir().unwrap();
    let out_dir = tmp_dir.path().join("tensors");
    let dtrain = synthetic_matrix(100, 15);

    let trees = Collection {
        name: CollectionName::Trees,
        save_config: Some(SaveConfig::at_steps(vec![4])),
    };
    let mut hook = Hook::builder(&out_dir)
        .save_config(SaveConfig::every(2))
        .collections(vec![Collection::new(CollectionName::Metrics), trees])
        .train_data(&dtrain)
        .build()
        .unwrap();
    train(
        &BoosterParams::default(),
        &dtrain,
        &[EvalSet::new("train", &dtrain)],
        5,
        &mut [&mut hook],
    )
    .unwrap();

    assert_eq!(hook.saved_steps(), &[0, 2, 4]);
    let step_zero = read_step_event(&json_event_file(&out_dir, 0)).unwrap();
    assert!(step_zero.tensor("trees/Node").is_none());
    let step_two = read_step_event(&json_event_file(&out_dir, 2)).unwrap();
    assert!(step_two.tensor("trees/Node").is_none());
    let step_four = read_step_event(&json_event_file(&out_dir, 4)).unwrap();
    assert!(step_four.tensor("trees/Node").is_some());
    assert!(step_four.tensor("train-rmse").is_some());
}

#[test]
fn cbor_events() {
    let tmp_dir = tempdir().unwrap();
    let out_dir = tmp_dir.path().join("tensors");
    let dtrain = synthetic_matrix(80, 16);
    let mut hook = Hook::builder(&out_dir)
        .tensor_format(TensorFormat::Cbor)
        .train_data(&dtrain)
        .build()
        .unwrap();
    train(
        &BoosterParams::default(),
        &dtrain,
        &[EvalSet::new("train", &dtrain)],
        2,
        &mut [&mut hook],
    )
    .unwrap();
    let path = out_dir
        .join("events")
        .join("000000000001")
        .join("000000000001_worker_0.cbor");
    let event = read_step_event(&path).unwrap();
    assert_eq!(event.step, 1);
    assert!(event.tensor("train-rmse").is_some());
}

#[test]
fn refuses_to_reuse_an_output_directory() {
    let tmp_dir = tempdir().unwrap();
    let out_dir = tmp_dir.path().join("tensors");
    let dtrain = synthetic_matrix(50, 17);
    let mut hook = Hook::builder(&out_dir).train_data(&dtrain).build().unwrap();
    train(
        &BoosterParams::default(),
        &dtrain,
        &[EvalSet::new("train", &dtrain)],
        1,
        &mut [&mut hook],
    )
    .unwrap();

    assert!(matches!(
        Hook::builder(&out_dir).build(),
        Err(HookError::OutputNotEmpty(_))
    ));
}

#[test]
fn no_eval_sets_means_no_metric_events() {
    let tmp_dir = tempdir().unwrap();
    let out_dir = tmp_dir.path().join("tensors");
    let dtrain = synthetic_matrix(50, 18);
    let mut hook = Hook::builder(&out_dir).train_data(&dtrain).build().unwrap();
    train(&BoosterParams::default(), &dtrain, &[], 3, &mut [&mut hook]).unwrap();

    assert!(hook.saved_steps().is_empty());
    assert!(!out_dir.join("events").exists());
    assert!(out_dir.join(END_OF_JOB_FILE).exists());
}
