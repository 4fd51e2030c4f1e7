use lorasim::radio::{AirtimeModel, ChannelModel, ChannelParams, GeoPoint, LoraModulation, SpreadingFactor};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn quiet_model() -> ChannelModel {
    ChannelModel::new(ChannelParams {
        shadowing_sigma_db: 0.0,
        ..ChannelParams::default()
    })
    .unwrap()
}

#[test]
fn test_path_loss_and_per_monotonic_in_distance() {
    let model = quiet_model();
    for sf in SpreadingFactor::ALL {
        let mut previous = model.evaluate(1.0, 14.0, sf, 0.0);
        for step in 1..200 {
            let distance = step as f64 * 250.0;
            let link = model.evaluate(distance, 14.0, sf, 0.0);
            assert!(link.path_loss_db >= previous.path_loss_db);
            assert!(link.per >= previous.per);
            assert!((0.0..=1.0).contains(&link.per));
            previous = link;
        }
    }
}

#[test]
fn test_higher_sf_tolerates_lower_snr() {
    let model = quiet_model();
    let snr = -12.0;
    let pers: Vec<f64> = SpreadingFactor::ALL
        .iter()
        .map(|&sf| model.packet_error_probability(snr, sf))
        .collect();
    assert!(pers.windows(2).all(|pair| pair[1] < pair[0]));
    // at threshold the logistic curve is exactly one half
    assert!((model.packet_error_probability(-20.0, SpreadingFactor::Sf12) - 0.5).abs() < 1e-12);
}

#[test]
fn test_max_range_is_where_mean_snr_meets_threshold() {
    let model = quiet_model();
    let mut previous_range = 0.0;
    for sf in SpreadingFactor::ALL {
        let range = model.max_range_m(sf, 14.0);
        assert!(range > previous_range);
        let link = model.evaluate(range, 14.0, sf, 0.0);
        assert!((link.snr_db - model.snr_threshold_db(sf)).abs() < 1e-6);
        assert!((link.per - 0.5).abs() < 1e-6);
        previous_range = range;
    }
}

#[test]
fn test_shadowing_statistics() {
    let model = ChannelModel::new(ChannelParams::default()).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let samples: Vec<f64> = (0..20_000).map(|_| model.sample_shadowing(&mut rng)).collect();
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    assert!(mean.abs() < 0.3, "mean {}", mean);
    assert!((variance.sqrt() - 8.0).abs() < 0.3, "sigma {}", variance.sqrt());
}

#[test]
fn test_same_seed_same_shadowing() {
    let model = ChannelModel::new(ChannelParams::default()).unwrap();
    let mut a = ChaCha8Rng::seed_from_u64(11);
    let mut b = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..100 {
        assert_eq!(model.sample_shadowing(&mut a), model.sample_shadowing(&mut b));
    }
}

#[test]
fn test_invalid_parameters_rejected() {
    let negative_sigma = ChannelParams {
        shadowing_sigma_db: -1.0,
        ..ChannelParams::default()
    };
    assert!(ChannelModel::new(negative_sigma).is_err());

    let zero_exponent = ChannelParams {
        path_loss_exponent: 0.0,
        ..ChannelParams::default()
    };
    assert!(ChannelModel::new(zero_exponent).is_err());
}

#[test]
fn test_haversine_distances() {
    let gateway = GeoPoint::new(23.8103, 90.4125);
    assert_eq!(gateway.distance_m(&gateway), 0.0);

    let north = gateway.north_by(5_000.0);
    assert!((gateway.distance_m(&north) - 5_000.0).abs() < 1e-3);
    assert!((north.distance_m(&gateway) - gateway.distance_m(&north)).abs() < 1e-9);

    // one degree of latitude is about 111.2 km
    let degree = GeoPoint::new(24.8103, 90.4125);
    assert!((gateway.distance_m(&degree) - 111_195.0).abs() < 10.0);
}

#[test]
fn test_airtime_grows_with_sf() {
    let table = AirtimeModel::default();
    let formula = AirtimeModel::Formula(LoraModulation::default());
    for model in [table, formula] {
        let airtimes: Vec<u64> = SpreadingFactor::ALL.iter().map(|&sf| model.airtime_ms(sf, 12)).collect();
        assert!(airtimes.windows(2).all(|pair| pair[1] > pair[0]), "{:?}", airtimes);
    }
    assert_eq!(AirtimeModel::default().airtime_ms(SpreadingFactor::Sf12, 12), 1155);
}
