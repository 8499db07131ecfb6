use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use labelreg_core::{Image, ImageGeometry};
use labelreg_engine::{
    checkpoint_path, Application, ApplicationConfig, ApplicationDriver, EngineError,
    HistoryCallback, ImageSource, RegApp, RegistrationParams,
};
use labelreg_io::write_nifti;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

type TrainBackend = Autodiff<NdArray<f32>>;

const SIZE: usize = 8;

/// Ball of radius 2.5 voxels centred at `centre` (z, y, x).
fn ball(centre: [f32; 3]) -> Vec<f32> {
    let mut voxels = Vec::with_capacity(SIZE * SIZE * SIZE);
    for z in 0..SIZE {
        for y in 0..SIZE {
            for x in 0..SIZE {
                let d2 = (z as f32 - centre[0]).powi(2)
                    + (y as f32 - centre[1]).powi(2)
                    + (x as f32 - centre[2]).powi(2);
                voxels.push(if d2 <= 6.25 { 1.0 } else { 0.0 });
            }
        }
    }
    voxels
}

fn write_volume(path: &Path, voxels: Vec<f32>) {
    let device = Default::default();
    let image = Image::<NdArray<f32>>::from_voxels(
        voxels,
        [SIZE, SIZE, SIZE],
        ImageGeometry::identity(),
        &device,
    )
    .unwrap();
    write_nifti(path, &image).unwrap();
}

/// Two subjects per side; moving balls are shifted along x.
fn write_dataset(root: &Path) {
    for (side, shift) in [("fixed", 0.0), ("moving", 1.5)] {
        let dir = root.join(side);
        std::fs::create_dir_all(&dir).unwrap();
        for (case, offset) in [("case01", 0.0), ("case02", 0.5)] {
            let label = ball([3.5, 3.5, 3.5 + shift + offset]);
            let image = label.iter().map(|v| v * 100.0 + 20.0).collect();
            write_volume(&dir.join(format!("{}_img.nii", case)), image);
            write_volume(&dir.join(format!("{}_seg.nii", case)), label);
        }
    }
}

fn config_toml(root: &Path, action: &str, max_iter: usize, starting_iter: usize) -> String {
    let root = root.display();
    format!(
        r#"
[SYSTEM]
action = "{action}"
model_dir = "{root}/model"
random_seed = 3

[NETWORK]
name = "inet_dense"
batch_size = 2
features = [4, 8]

[TRAINING]
optimiser = "adam"
lr = 0.001
max_iter = {max_iter}
starting_iter = {starting_iter}

[REGISTRATION]
fixed_image = "fixed_img"
fixed_label = "fixed_seg"
moving_image = "moving_img"
moving_label = "moving_seg"

[fixed_img]
path_to_search = "{root}/fixed"
filename_contains = "img"
spatial_window_size = [8, 8, 8]
normalisation = true

[fixed_seg]
path_to_search = "{root}/fixed"
filename_contains = "seg"

[moving_img]
path_to_search = "{root}/moving"
filename_contains = "img"
normalisation = true

[moving_seg]
path_to_search = "{root}/moving"
filename_contains = "seg"
"#
    )
}

fn load(root: &Path, action: &str, max_iter: usize, starting_iter: usize) -> ApplicationConfig<RegistrationParams> {
    ApplicationConfig::from_toml_str(
        &config_toml(root, action, max_iter, starting_iter),
        <RegApp<TrainBackend> as Application<TrainBackend>>::REQUIRED_CONFIG_SECTION,
    )
    .unwrap()
}

fn build_app(config: &ApplicationConfig<RegistrationParams>) -> RegApp<TrainBackend> {
    let device = Default::default();
    RegApp::new(
        config.network.clone(),
        config.action.clone(),
        config.system.action.is_training(),
        &device,
    )
    .with_seed(config.system.random_seed)
}

#[test]
fn test_training_writes_checkpoint_and_reports_loss() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path());

    let config = load(dir.path(), "train", 2, 0);
    let mut app = build_app(&config);
    let mut driver = ApplicationDriver::new(config);
    let history = HistoryCallback::new();
    driver.add_callback(Arc::new(history.clone()));

    let summary = driver.run::<TrainBackend, _>(&mut app).unwrap();

    let (fixed, moving) = app.readers().unwrap();
    assert_eq!(fixed.fields(), vec!["fixed_image", "fixed_label"]);
    assert_eq!(moving.fields(), vec!["moving_image", "moving_label"]);
    assert_eq!(fixed.len(), 2);
    assert_eq!(moving.subject_id(1), Some("case02"));
    assert!(app.has_optimiser());

    assert_eq!(summary.iterations_run, 2);
    assert_eq!(summary.console.len(), 1);
    let (name, loss) = &summary.console[0];
    assert_eq!(name, "label_loss");
    assert!(loss.is_finite() && *loss >= 0.0);
    assert_eq!(history.history().len(), 2);

    let checkpoint = checkpoint_path(&dir.path().join("model"), 2);
    assert_eq!(summary.checkpoint.as_deref(), Some(checkpoint.as_path()));
    assert!(checkpoint.with_extension("mpk").is_file());
}

#[test]
fn test_training_resumes_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path());

    let first = load(dir.path(), "train", 1, 0);
    let mut app = build_app(&first);
    ApplicationDriver::new(first).run::<TrainBackend, _>(&mut app).unwrap();

    let resumed = load(dir.path(), "train", 2, 1);
    let mut app = build_app(&resumed);
    let summary = ApplicationDriver::new(resumed).run::<TrainBackend, _>(&mut app).unwrap();

    assert_eq!(summary.iterations_run, 1);
    assert_eq!(summary.final_iteration, 2);
    assert!(checkpoint_path(&dir.path().join("model"), 2)
        .with_extension("mpk")
        .is_file());
}

#[test]
fn test_missing_checkpoint_aborts_resume() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path());

    let config = load(dir.path(), "train", 5, 3);
    let mut app = build_app(&config);
    let err = ApplicationDriver::new(config).run::<TrainBackend, _>(&mut app).unwrap_err();
    assert!(matches!(err, EngineError::Checkpoint(_)));
}

#[test]
fn test_inference_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path());

    let config = load(dir.path(), "inference", 1, 0);
    assert!(!config.system.action.is_training());
    let mut app = build_app(&config);
    let err = ApplicationDriver::new(config).run::<TrainBackend, _>(&mut app).unwrap_err();
    assert!(matches!(
        err,
        EngineError::UnsupportedMode { stage: "initialise_dataset_loader" }
    ));
}
