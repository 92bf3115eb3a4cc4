use super::*;
use cv_imgproc::IntegralImage;
use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Read, Write};

fn sample_cascade() -> HaarCascade {
    let stages = vec![
        CascadeStage {
            threshold: -120,
            features: vec![
                HaarFeature {
                    rects: vec![
                        WeightedRect::new(0, 0, 24, 12, -1),
                        WeightedRect::new(0, 12, 24, 12, 1),
                    ],
                    threshold: 15,
                    alpha_low: -80,
                    alpha_high: 90,
                },
                HaarFeature {
                    rects: vec![WeightedRect::new(4, 4, 8, 8, 2)],
                    threshold: -3,
                    alpha_low: 40,
                    alpha_high: -35,
                },
            ],
        },
        CascadeStage {
            threshold: 30,
            features: vec![HaarFeature {
                rects: vec![
                    WeightedRect::new(0, 0, 0, 0, 3),
                    WeightedRect::new(2, 2, 20, 10, -1),
                    WeightedRect::new(2, 12, 20, 10, 1),
                ],
                threshold: 0,
                alpha_low: -10,
                alpha_high: 60,
            }],
        },
    ];
    HaarCascade::from_stages(WindowSize::new(24, 24), stages, CascadeParams::default()).unwrap()
}

/// One stage, one feature covering the whole window.
fn single_stage(window: WindowSize, stage_threshold: i16) -> HaarCascade {
    let stage = CascadeStage {
        threshold: stage_threshold,
        features: vec![HaarFeature {
            rects: vec![WeightedRect::new(
                0,
                0,
                window.width as i16,
                window.height as i16,
                1,
            )],
            threshold: 0,
            alpha_low: -1,
            alpha_high: 1,
        }],
    };
    HaarCascade::from_stages(window, vec![stage], CascadeParams::default()).unwrap()
}

fn noise_image(width: u32, height: u32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    GrayImage::from_fn(width, height, |_, _| Luma([rng.gen()]))
}

/// Little-endian model bytes written field by field.
#[derive(Default)]
struct ModelBytes(Vec<u8>);

impl ModelBytes {
    fn i32(mut self, v: i32) -> Self {
        self.0.write_i32::<LittleEndian>(v).unwrap();
        self
    }

    fn u8s(mut self, v: &[u8]) -> Self {
        self.0.extend_from_slice(v);
        self
    }

    fn i16s(mut self, v: &[i16]) -> Self {
        for &x in v {
            self.0.write_i16::<LittleEndian>(x).unwrap();
        }
        self
    }
}

fn load(bytes: &[u8]) -> crate::Result<HaarCascade> {
    CascadeLoader::new().load(bytes)
}

#[test]
fn test_roundtrip_reproduces_arrays() {
    let cascade = sample_cascade();
    let loaded = load(&cascade.to_bytes().unwrap()).unwrap();

    assert_eq!(loaded, cascade);
    assert_eq!(loaded.window(), WindowSize::new(24, 24));
    assert_eq!(loaded.stage_count(), 2);
    assert_eq!(loaded.feature_count(), 3);
    assert_eq!(loaded.rectangle_count(), 6);
    assert_eq!(loaded.stage_feature_counts(), vec![2, 1]);
    assert_eq!(loaded.stage_thresholds(), vec![-120, 30]);
    assert_eq!(loaded.tree_thresholds(), vec![15, -3, 0]);
    assert_eq!(loaded.tree_alpha_low(), vec![-80, 40, -10]);
    assert_eq!(loaded.tree_alpha_high(), vec![90, -35, 60]);
    assert_eq!(loaded.tree_rectangle_counts(), vec![2, 1, 3]);
    assert_eq!(loaded.rectangle_weights(), vec![-1, 1, 2, 3, -1, 1]);
    assert_eq!(
        loaded.rectangle_geometry(),
        vec![0, 0, 24, 12, 0, 12, 24, 12, 4, 4, 8, 8, 0, 0, 0, 0, 2, 2, 20, 10, 2, 12, 20, 10]
    );
}

#[test]
fn test_hand_written_model_bytes() {
    // window 4x3, one stage with one feature of one rectangle
    let bytes = ModelBytes::default()
        .i32(4)
        .i32(3)
        .i32(1)
        .u8s(&[1])
        .i16s(&[-7]) // stage threshold
        .i16s(&[300]) // feature threshold
        .i16s(&[-2]) // alpha low
        .i16s(&[5]) // alpha high
        .i16s(&[1]) // rectangles per feature
        .i16s(&[-1]) // weight
        .i16s(&[1, 0, 3, 2]) // geometry
        .0;

    let cascade = load(&bytes).unwrap();
    let stage = &cascade.stages()[0];
    assert_eq!(stage.threshold, -7);
    let feature = &stage.features[0];
    assert_eq!(feature.threshold, 300);
    assert_eq!((feature.alpha_low, feature.alpha_high), (-2, 5));
    assert_eq!(feature.rects, vec![WeightedRect::new(1, 0, 3, 2, -1)]);

    // The writer emits exactly the same bytes
    assert_eq!(cascade.to_bytes().unwrap(), bytes);
}

#[test]
fn test_trailing_bytes_ignored() {
    let cascade = sample_cascade();
    let mut bytes = cascade.to_bytes().unwrap();
    bytes.extend_from_slice(&[0xAB; 7]);
    assert_eq!(load(&bytes).unwrap(), cascade);
}

#[test]
fn test_truncated_at_every_length() {
    let bytes = sample_cascade().to_bytes().unwrap();
    for len in 0..bytes.len() {
        match load(&bytes[..len]) {
            Err(ObjdetectError::TruncatedModel {
                expected, actual, ..
            }) => assert!(actual < expected, "prefix {len}"),
            other => panic!("prefix {len}: expected truncation, got {other:?}"),
        }
    }
}

#[test]
fn test_truncation_reports_field() {
    let bytes = ModelBytes::default().i32(24).i32(24).i32(3).u8s(&[1, 1]).0;
    match load(&bytes) {
        Err(ObjdetectError::TruncatedModel {
            field,
            expected,
            actual,
        }) => {
            assert_eq!(field, "stage feature counts");
            assert_eq!((expected, actual), (3, 2));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_huge_counts_do_not_preallocate() {
    // Claims i32::MAX stages but supplies none; must fail on the missing
    // bytes, not try to allocate for the claimed count.
    let bytes = ModelBytes::default().i32(24).i32(24).i32(i32::MAX).0;
    assert!(matches!(
        load(&bytes),
        Err(ObjdetectError::TruncatedModel { .. })
    ));
}

struct FailingReader {
    remaining: Vec<u8>,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining.is_empty() {
            return Err(io::Error::new(io::ErrorKind::Other, "device removed"));
        }
        let n = buf.len().min(self.remaining.len());
        buf[..n].copy_from_slice(&self.remaining[..n]);
        self.remaining.drain(..n);
        Ok(n)
    }
}

#[test]
fn test_stream_error_is_io_error() {
    let mut bytes = sample_cascade().to_bytes().unwrap();
    bytes.truncate(20);
    let result = CascadeLoader::new().load(FailingReader { remaining: bytes });
    assert!(matches!(result, Err(ObjdetectError::Io(_))));
}

/// Accepts `capacity` bytes, then fails every write.
struct FullDevice {
    capacity: usize,
}

impl Write for FullDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.capacity == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "device full"));
        }
        let n = buf.len().min(self.capacity);
        self.capacity -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_write_error_is_reported() {
    let cascade = sample_cascade();
    let len = cascade.to_bytes().unwrap().len();
    for capacity in [0, 5, len / 2, len - 1] {
        let result = cascade.write_to(FullDevice { capacity });
        assert!(matches!(result, Err(ObjdetectError::Io(_))), "capacity {capacity}");
    }
    assert!(cascade.write_to(FullDevice { capacity: len }).is_ok());
}

#[test]
fn test_malformed_models_rejected() {
    let cases = [
        ("zero window", ModelBytes::default().i32(0).i32(24).i32(0).0),
        ("negative stage count", ModelBytes::default().i32(24).i32(24).i32(-1).0),
        (
            "negative rectangle count",
            ModelBytes::default()
                .i32(24)
                .i32(24)
                .i32(1)
                .u8s(&[1])
                .i16s(&[0, 0, 0, 0, -2])
                .0,
        ),
        (
            "rectangle outside window",
            ModelBytes::default()
                .i32(24)
                .i32(24)
                .i32(1)
                .u8s(&[1])
                .i16s(&[0, 0, 0, 0, 1])
                .i16s(&[1])
                .i16s(&[20, 0, 5, 4])
                .0,
        ),
        (
            "negative geometry",
            ModelBytes::default()
                .i32(24)
                .i32(24)
                .i32(1)
                .u8s(&[1])
                .i16s(&[0, 0, 0, 0, 1])
                .i16s(&[1])
                .i16s(&[-1, 0, 5, 4])
                .0,
        ),
    ];

    for (name, bytes) in cases {
        assert!(
            matches!(load(&bytes), Err(ObjdetectError::MalformedModel(_))),
            "{name}"
        );
    }
}

#[test]
fn test_from_stages_enforces_format_limits() {
    let feature = HaarFeature {
        rects: vec![],
        threshold: 0,
        alpha_low: 0,
        alpha_high: 0,
    };
    let stage = CascadeStage {
        threshold: 0,
        features: vec![feature; 256],
    };
    let result = HaarCascade::from_stages(WindowSize::new(8, 8), vec![stage], CascadeParams::default());
    assert!(matches!(result, Err(ObjdetectError::MalformedModel(_))));
}

#[test]
fn test_loader_params_attached() {
    let params = CascadeParams::new().with_scale_factor(1.5).with_step(3);
    let bytes = sample_cascade().to_bytes().unwrap();
    let cascade = CascadeLoader::new().with_params(params).load(bytes.as_slice()).unwrap();
    assert_eq!(cascade.params(), params);

    let invalid = CascadeLoader::new()
        .with_params(CascadeParams::new().with_step(0))
        .load(bytes.as_slice());
    assert!(matches!(invalid, Err(ObjdetectError::InvalidParameter(_))));
}

#[test]
fn test_feature_vote_threshold() {
    let img = GrayImage::from_pixel(24, 24, Luma([10]));
    let integral = IntegralImage::compute(&img).unwrap();

    // 4x4 block of 10s, weight 1: 160 << 12
    let mut feature = HaarFeature {
        rects: vec![WeightedRect::new(0, 0, 4, 4, 1)],
        threshold: 1,
        alpha_low: -5,
        alpha_high: 7,
    };
    assert_eq!(feature.evaluate(&integral, 0, 0, 160 << 12), 7);
    assert_eq!(feature.evaluate(&integral, 0, 0, (160 << 12) + 1), -5);

    // Negative weights flip the sign of the sum
    feature.rects[0].weight = -1;
    assert_eq!(feature.evaluate(&integral, 3, 3, 0), -5);
    feature.threshold = -1;
    assert_eq!(feature.evaluate(&integral, 3, 3, 160 << 12), 7);
}

#[test]
fn test_zero_area_rectangle_contributes_nothing() {
    let img = noise_image(24, 24, 3);
    let integral = IntegralImage::compute(&img).unwrap();

    let feature = HaarFeature {
        rects: vec![WeightedRect::new(5, 5, 0, 7, 100), WeightedRect::new(2, 9, 4, 0, -100)],
        threshold: 0,
        alpha_low: -1,
        alpha_high: 1,
    };
    // Sum is exactly zero, which meets a zero threshold but not a positive one
    assert_eq!(feature.evaluate(&integral, 0, 0, 12345), 1);
    let stricter = HaarFeature {
        threshold: 1,
        ..feature
    };
    assert_eq!(stricter.evaluate(&integral, 0, 0, 1), -1);
}

#[test]
fn test_evaluate_feature_by_global_index() {
    let cascade = sample_cascade();
    let img = noise_image(24, 24, 11);
    let integral = IntegralImage::compute(&img).unwrap();

    let third = &cascade.stages()[1].features[0];
    assert_eq!(
        cascade.evaluate_feature(2, &integral, 0, 0, 50),
        Some(third.evaluate(&integral, 0, 0, 50))
    );
    assert_eq!(cascade.evaluate_feature(3, &integral, 0, 0, 50), None);
}

#[test]
fn test_unreachable_minimum_threshold_accepts_all() {
    let window = WindowSize::new(8, 8);
    let cascade = single_stage(window, i16::MIN);
    let img = noise_image(32, 32, 7);
    let integral = IntegralImage::compute(&img).unwrap();

    for y in 0..=24 {
        for x in 0..=24 {
            let stats = WindowStatistics::compute(img.as_raw(), 32, &integral, x, y, window);
            assert_eq!(cascade.run(&integral, x, y, stats.std_proxy), CascadeOutcome::Accept);
        }
    }
}

#[test]
fn test_unreachable_maximum_threshold_rejects_at_first_stage() {
    let window = WindowSize::new(8, 8);
    let cascade = single_stage(window, i16::MAX);
    let img = noise_image(32, 32, 8);
    let integral = IntegralImage::compute(&img).unwrap();

    for y in 0..=24 {
        for x in 0..=24 {
            let stats = WindowStatistics::compute(img.as_raw(), 32, &integral, x, y, window);
            assert_eq!(
                cascade.run(&integral, x, y, stats.std_proxy),
                CascadeOutcome::Reject(0)
            );
        }
    }
}

#[test]
fn test_early_exit_and_resume_from_stage() {
    let window = WindowSize::new(8, 8);
    let reject = single_stage(window, i16::MAX).stages()[0].clone();
    let accept = single_stage(window, i16::MIN).stages()[0].clone();
    let cascade = HaarCascade::from_stages(
        window,
        vec![accept.clone(), reject, accept],
        CascadeParams::default(),
    )
    .unwrap();

    let img = noise_image(8, 8, 1);
    let integral = IntegralImage::compute(&img).unwrap();

    assert_eq!(cascade.run(&integral, 0, 0, 10), CascadeOutcome::Reject(1));
    assert_eq!(cascade.run_from(&integral, 0, 0, 10, 2), CascadeOutcome::Accept);
    assert_eq!(cascade.run_from(&integral, 0, 0, 10, 9), CascadeOutcome::Accept);
}

#[test]
fn test_stage_relaxation() {
    let stage = CascadeStage {
        threshold: 100,
        features: vec![],
    };
    // Passing requires sum >= 0.4 * 100
    assert!(stage.passes(40));
    assert!(!stage.passes(39));

    let negative = CascadeStage {
        threshold: -100,
        features: vec![],
    };
    assert!(negative.passes(-40));
    assert!(!negative.passes(-41));
}

#[test]
fn test_uniform_window_statistics() {
    let window = WindowSize::new(24, 24);
    for value in [0u8, 1, 128, 255] {
        let img = GrayImage::from_pixel(30, 30, Luma([value]));
        let integral = IntegralImage::compute(&img).unwrap();
        let stats = WindowStatistics::compute(img.as_raw(), 30, &integral, 3, 5, window);

        assert_eq!(stats.mean, 576 * value as u64);
        assert_eq!(stats.sum_sq, 576 * (value as u64).pow(2));
        assert_eq!(stats.std_proxy, 0);
    }
}

#[test]
fn test_uniform_window_with_sum_beyond_u32() {
    // 4105 x 4105 window of 255: the pixel sum no longer fits in u32
    let (side, window) = (4106u32, WindowSize::new(4105, 4105));
    let pixels = vec![255u8; (side * side) as usize];
    let mut integral = IntegralImage::new();
    integral.compute_from(&pixels, side, side).unwrap();

    let stats = WindowStatistics::compute(&pixels, side as usize, &integral, 1, 0, window);
    assert_eq!(stats.mean, 255 * window.area());
    assert!(stats.mean > u32::MAX as u64);
    assert_eq!(stats.std_proxy, 0);
}

#[test]
fn test_window_statistics_match_direct_computation() {
    for seed in 0..20 {
        let img = noise_image(40, 33, seed);
        let integral = IntegralImage::compute(&img).unwrap();
        let window = WindowSize::new(15, 11);
        let (x, y) = ((seed as usize * 3) % 25, (seed as usize * 5) % 22);

        let stats = WindowStatistics::compute(img.as_raw(), 40, &integral, x, y, window);

        let mut sum = 0u64;
        let mut sum_sq = 0u64;
        for yy in y..y + 11 {
            for xx in x..x + 15 {
                let v = img.get_pixel(xx as u32, yy as u32)[0] as u64;
                sum += v;
                sum_sq += v * v;
            }
        }
        assert_eq!(stats.mean, sum);
        assert_eq!(stats.sum_sq, sum_sq);

        let spread = sum_sq * 165 - sum * sum;
        let root = stats.std_proxy;
        assert!(root * root <= spread && (root + 1) * (root + 1) > spread);
    }
}

#[test]
fn test_pyramid_terminates_before_window_exceeds_level() {
    let window = WindowSize::new(24, 24);
    for (w, h) in [(64, 64), (100, 37), (25, 25), (24, 24), (10, 500), (640, 480)] {
        let levels: Vec<_> = PyramidPlan::new(w, h, window, 1.25).collect();

        for level in &levels {
            assert!(level.width > window.width && level.height > window.height);
        }
        if let Some(last) = levels.last() {
            let next_factor = last.factor * 1.25;
            let next_w = (w as f32 / next_factor) as u32;
            let next_h = (h as f32 / next_factor) as u32;
            assert!(next_w <= window.width || next_h <= window.height);
        }
    }

    let sizes: Vec<_> = PyramidPlan::new(64, 64, window, 1.25)
        .map(|l| l.width)
        .collect();
    assert_eq!(sizes, vec![64, 51, 40, 32, 26]);
    assert_eq!(PyramidPlan::new(24, 24, window, 1.25).count(), 0);
    assert_eq!(PyramidPlan::new(640, 480, window, 1.0).count(), 0);
}

#[test]
fn test_level_coordinates_map_back_within_a_pixel() {
    let window = WindowSize::new(24, 24);
    for factor in [1.0f32, 1.25, 1.5625, 2.7, 3.3] {
        let level = LevelGeometry {
            factor,
            width: 100,
            height: 100,
        };
        for (x, y) in [(0usize, 0usize), (2, 4), (17, 31), (50, 8)] {
            let r = level.to_source(x, y, window);
            let scale = level.scale();
            assert!((r.x as f32 - x as f32 / scale).abs() <= 1.0);
            assert!((r.y as f32 - y as f32 / scale).abs() <= 1.0);
            assert!((r.width as f32 - window.width as f32 / scale).abs() <= 1.0);
            assert!((r.height as f32 - window.height as f32 / scale).abs() <= 1.0);
        }
    }
}

#[test]
fn test_imgproc_errors_map_to_objdetect_errors() {
    use cv_imgproc::ImgprocError;

    let err: ObjdetectError = ImgprocError::AllocationFailed("level buffer".into()).into();
    assert!(matches!(err, ObjdetectError::OutOfMemory(msg) if msg == "level buffer"));

    let err: ObjdetectError = ImgprocError::DimensionMismatch("0x0".into()).into();
    assert!(matches!(err, ObjdetectError::Imgproc(ImgprocError::DimensionMismatch(_))));
}
