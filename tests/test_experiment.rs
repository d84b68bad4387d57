extern crate icnet_seg;

use std::thread::sleep;
use std::time::Duration;
use icnet_seg::common::{ComputeDevice, TrainConfig};
use icnet_seg::data::{colorize_mask, rm_file, rmrf_mkdir, ClassIou, FsAccess, Palette, Timer};
use icnet_seg::training::{DataLoader, DeviceContext, ExperimentContext, InMemoryLoader};
use image::Rgb;
use ndarray::{array, Array2, Array3};


#[test]
fn config_from_partial_json_keeps_defaults_and_text() {
    let root = fixtures::temp_dir("config_file");
    let path = root.join("config.json");
    let text = r#"{
    "exp_name": "waste_icnet",
    "lr": 0.001,
    "num_classes": 3,
    "class_names": ["background", "plastic", "paper"],
    "gpu_ids": [0, 1]
}"#;
    std::fs::write(&path, text).unwrap();

    let config = TrainConfig::from_file(&path).unwrap();
    assert_eq!(config.exp_name, "waste_icnet");
    assert_eq!(config.lr, 0.001);
    assert_eq!(config.batch_size, TrainConfig::default().batch_size);
    assert_eq!(config.loss_weights, [0.0, 1.0, 0.4, 0.4]);
    assert_eq!(config.class_name(2), "paper");
    assert_eq!(config.device(), ComputeDevice::DataParallel(vec![0, 1]));
    assert_eq!(config.log_text().unwrap(), text);

    std::fs::write(&path, r#"{"num_classes": 2, "class_names": ["a"]}"#).unwrap();
    assert!(TrainConfig::from_file(&path).is_err());
    std::fs::write(&path, "{ not json").unwrap();
    assert!(TrainConfig::from_file(&path).is_err());

    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn config_validation() {
    assert!(TrainConfig::new().validate().is_ok());
    assert!(TrainConfig::new().with_num_classes(0).validate().is_err());
    assert!(TrainConfig::new().with_batch_size(0).validate().is_err());
    assert!(TrainConfig::new().with_img_size(0, 448).validate().is_err());
    assert!(TrainConfig::new().with_lr(0.0).validate().is_err());
    assert!(TrainConfig::new().with_lr_decay(0.5, 0).validate().is_err());
    assert!(TrainConfig::new().with_exp_name("").validate().is_err());
    assert!(TrainConfig::new().with_loss_weights([0.0, 1.0, -0.4, 0.4]).validate().is_err());

    let generated = TrainConfig::new().with_exp_name("plain");
    assert!(generated.log_text().unwrap().contains("\"exp_name\": \"plain\""));
    assert_eq!(generated.class_name(1), "Class 1");
}

#[test]
fn devices_from_gpu_ids() {
    assert_eq!(ComputeDevice::from_gpu_ids(&[]), ComputeDevice::CPU);
    assert_eq!(ComputeDevice::from_gpu_ids(&[3]), ComputeDevice::CUDA(3));
    assert_eq!(ComputeDevice::from_str("cuda", &[]), Some(ComputeDevice::CUDA(0)));
    assert_eq!(ComputeDevice::from_str("DataParallel", &[1]), None);
    assert_eq!(ComputeDevice::CUDA(2).to_string(), "CUDA[2]");
    assert!(!ComputeDevice::CPU.is_accelerator());
}

#[test]
fn device_context_is_exclusive_but_reusable() {
    fixtures::init_logger();
    let first = DeviceContext::acquire(ComputeDevice::CPU, 2).unwrap();
    assert_eq!(first.num_threads(), 2);
    assert_eq!(first.install(|| rayon::current_num_threads()), 2);
    drop(first);

    let second = DeviceContext::acquire(ComputeDevice::CUDA(0), 1).unwrap();
    assert_eq!(second.device(), &ComputeDevice::CUDA(0));
}

#[test]
fn experiment_context_writes_config_to_log() {
    fixtures::init_logger();
    let root = fixtures::temp_dir("context");
    let config = fixtures::test_config("context", &root, 2);
    let expected = config.log_text().unwrap();

    let ctx = ExperimentContext::open(config).unwrap();
    assert!(ctx.exp_dir().is_dir());
    assert_eq!(ctx.exp_dir(), root.join("exp").join("context"));
    ctx.log_line("after\n").unwrap();

    let log = std::fs::read_to_string(ctx.log_file()).unwrap();
    assert_eq!(log, format!("{}\n\n\n\nafter\n", expected));

    drop(ctx);
    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn invalid_config_does_not_open() {
    let root = fixtures::temp_dir("bad_context");
    let config = fixtures::test_config("bad_context", &root, 0);
    assert!(ExperimentContext::open(config).is_err());
    assert!(!root.join("logs").join("bad_context.txt").exists());
    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn filesystem_helpers() {
    let root = fixtures::temp_dir("fs");
    let dir = root.join("epoch_0");
    rmrf_mkdir(&dir).unwrap();
    std::fs::write(dir.join("0.png"), b"stale").unwrap();
    rmrf_mkdir(&dir).unwrap();
    assert!(dir.is_dir());
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);

    let file = root.join("log.txt");
    std::fs::write(&file, b"x").unwrap();
    rm_file(&file).unwrap();
    assert!(!file.exists());
    rm_file(&file).unwrap();

    let nested = FsAccess::Current.resolve(root.join("a").join("b")).unwrap();
    assert_eq!(nested, root.join("a").join("b"));
    assert!(nested.is_dir());

    let relative = FsAccess::Current.resolve("target").unwrap();
    assert_eq!(relative, std::env::current_dir().unwrap().join("target"));

    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn colorize_mask_uses_palette() {
    let mask = array![[0i64, 1, 2], [-1, 3, 42]];
    let img = colorize_mask(mask.view(), &Palette::default());
    assert_eq!(img.dimensions(), (3, 2));
    assert_eq!(*img.get_pixel(1, 0), Rgb([128, 0, 128]));
    assert_eq!(*img.get_pixel(2, 0), Rgb([0, 255, 0]));
    assert_eq!(*img.get_pixel(0, 1), Rgb([0, 0, 0]));
    assert_eq!(*img.get_pixel(1, 1), Rgb([255, 0, 0]));
    assert_eq!(*img.get_pixel(2, 1), Rgb([0, 0, 0]));
}

#[test]
fn timer_accumulates() {
    let mut timer = Timer::new();
    assert_eq!(timer.toc(true), Duration::ZERO);

    for _ in 0..2 {
        timer.tic();
        sleep(Duration::from_millis(5));
        timer.toc(false);
    }
    assert_eq!(timer.calls(), 2);
    assert!(timer.total() >= Duration::from_millis(10));
    assert!(timer.average_time() >= Duration::from_millis(5));
    assert!(timer.diff() <= timer.total());

    timer.clear();
    assert_eq!(timer.calls(), 0);
}

#[test]
fn class_iou_reports_percent() {
    let c = ClassIou::new(1, "plastic".to_string(), 0.5);
    assert_eq!(c.percent(), 50.);
    assert!(c.is_defined());
    assert!(!ClassIou::new(2, "paper".to_string(), f64::NAN).is_defined());
}

#[test]
fn in_memory_loader_batches() {
    let samples = fixtures::one_hot_samples(10, 2, 4, 4, 0);
    let mut loader = InMemoryLoader::new(samples, 4).unwrap();
    assert_eq!(loader.len(), 3);
    assert_eq!(loader.num_samples(), 10);

    let sizes: Vec<_> = loader.batches().map(|b| b.unwrap().len()).collect();
    assert_eq!(sizes, vec![4, 4, 2]);

    // a batch of one sample is a valid batch
    let mut single = InMemoryLoader::new(fixtures::one_hot_samples(1, 2, 4, 4, 0), 4).unwrap();
    let batch = single.batches().next().unwrap().unwrap();
    assert_eq!(batch.images.dim(), (1, 2, 4, 4));
    assert_eq!(batch.labels.dim(), (1, 4, 4));
}

#[test]
fn shuffled_loader_serves_every_sample_once() {
    // tag each sample by its label value so the order can be read back
    let samples: Vec<_> = (0..9)
        .map(|i| (Array3::<f32>::zeros((1, 2, 2)), Array2::from_elem((2, 2), i as i64)))
        .collect();
    let mut loader = InMemoryLoader::new(samples, 4).unwrap().with_shuffle(3);

    let mut epochs = vec![];
    for _ in 0..2 {
        let mut seen: Vec<i64> = loader
            .batches()
            .flat_map(|b| {
                let b = b.unwrap();
                b.labels.outer_iter().map(|l| l[[0, 0]]).collect::<Vec<_>>()
            })
            .collect();
        epochs.push(seen.clone());
        seen.sort();
        assert_eq!(seen, (0..9).collect::<Vec<i64>>());
    }
    assert_ne!(epochs[0], epochs[1]);
}

#[test]
fn loader_rejects_mismatched_samples() {
    let samples = vec![
        (Array3::<f32>::zeros((3, 4, 4)), Array2::<i64>::zeros((4, 4))),
        (Array3::<f32>::zeros((3, 4, 5)), Array2::<i64>::zeros((4, 5))),
    ];
    assert!(InMemoryLoader::new(samples, 2).is_err());

    let samples = vec![(Array3::<f32>::zeros((3, 4, 4)), Array2::<i64>::zeros((4, 3)))];
    assert!(InMemoryLoader::new(samples, 2).is_err());
    assert!(InMemoryLoader::new(vec![], 0).is_err());
}

#[test]
fn loader_from_config_uses_batch_size_seed_and_img_size() {
    let config = TrainConfig::new().with_batch_size(3).with_img_size(4, 4).with_seed(9);
    let samples: Vec<_> = (0..7)
        .map(|i| (Array3::<f32>::zeros((1, 4, 4)), Array2::from_elem((4, 4), i as i64)))
        .collect();

    let order = |loader: &mut InMemoryLoader| -> Vec<i64> {
        loader
            .batches()
            .flat_map(|b| b.unwrap().labels.outer_iter().map(|l| l[[0, 0]]).collect::<Vec<_>>())
            .collect()
    };

    let mut a = InMemoryLoader::from_config(samples.clone(), &config, true).unwrap();
    let mut b = InMemoryLoader::from_config(samples.clone(), &config, true).unwrap();
    let mut c = InMemoryLoader::from_config(samples.clone(), &config.clone().with_seed(10), true).unwrap();
    assert_eq!(a.len(), 3);
    let first = order(&mut a);
    assert_eq!(first, order(&mut b));
    assert_ne!(first, order(&mut c));

    let mut plain = InMemoryLoader::from_config(samples.clone(), &config, false).unwrap();
    assert_eq!(order(&mut plain), (0..7).collect::<Vec<i64>>());

    assert!(InMemoryLoader::from_config(samples, &config.with_img_size(8, 8), false).is_err());
}
