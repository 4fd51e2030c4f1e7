//! Physical-layer channel model.
//!
//! Maps a link (distance, transmit power, spreading factor) plus one shadowing
//! sample onto path loss, RSSI, SNR and packet error probability:
//!
//! ```text
//! PL(d) = PL(d0) + 10 * n * log10(d / d0) + X_sigma
//! RSSI  = P_tx - PL(d)
//! SNR   = RSSI - noise_floor
//! PER   = 1 / (1 + exp(k * (SNR - threshold[SF])))
//! ```
//!
//! The model holds no mutable state. The shadowing term is drawn by the caller
//! through [`ChannelModel::sample_shadowing`] from an explicitly passed RNG so
//! that runs are reproducible from a seed.

use super::{SfTable, SpreadingFactor};
use crate::error::ConfigError;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Minimum SNR (dB) needed to demodulate at SF7..SF12.
pub const DEFAULT_SNR_THRESHOLDS_DB: SfTable<f64> = [-7.5, -10.0, -12.5, -15.0, -17.5, -20.0];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelParams {
    /// Path loss at the reference distance, PL(d0), in dB.
    pub reference_loss_db: f64,
    /// Reference distance d0 in meters.
    pub reference_distance_m: f64,
    /// Path loss exponent n. 2 for free space, 2-4 urban, 4-6 dense urban.
    pub path_loss_exponent: f64,
    /// Standard deviation of the zero-mean shadowing term, in dB. Zero disables shadowing.
    pub shadowing_sigma_db: f64,
    pub noise_floor_dbm: f64,
    pub snr_thresholds_db: SfTable<f64>,
    /// Slope `k` of the logistic error curve around each threshold.
    pub per_steepness: f64,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            reference_loss_db: 40.0,
            reference_distance_m: 1.0,
            path_loss_exponent: 3.5,
            shadowing_sigma_db: 8.0,
            noise_floor_dbm: -174.0,
            snr_thresholds_db: DEFAULT_SNR_THRESHOLDS_DB,
            per_steepness: 2.0,
        }
    }
}

impl ChannelParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, f64, bool); 6] = [
            ("reference_loss_db", self.reference_loss_db, true),
            ("reference_distance_m", self.reference_distance_m, self.reference_distance_m > 0.0),
            ("path_loss_exponent", self.path_loss_exponent, self.path_loss_exponent > 0.0),
            ("shadowing_sigma_db", self.shadowing_sigma_db, self.shadowing_sigma_db >= 0.0),
            ("noise_floor_dbm", self.noise_floor_dbm, true),
            ("per_steepness", self.per_steepness, self.per_steepness > 0.0),
        ];
        for (name, value, in_range) in checks {
            if !value.is_finite() || !in_range {
                return Err(ConfigError::InvalidChannelParameter { name, value });
            }
        }
        for (index, &threshold) in self.snr_thresholds_db.iter().enumerate() {
            if !threshold.is_finite() {
                return Err(ConfigError::InvalidChannelParameter {
                    name: "snr_thresholds_db",
                    value: threshold,
                });
            }
            // higher spreading factors demodulate deeper below the noise
            if index > 0 && threshold > self.snr_thresholds_db[index - 1] {
                return Err(ConfigError::InvalidChannelParameter {
                    name: "snr_thresholds_db",
                    value: threshold,
                });
            }
        }
        Ok(())
    }
}

/// Result of one channel realization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkQuality {
    pub path_loss_db: f64,
    pub rssi_dbm: f64,
    pub snr_db: f64,
    /// Packet error probability in [0, 1].
    pub per: f64,
}

#[derive(Debug, Clone)]
pub struct ChannelModel {
    params: ChannelParams,
    shadowing: Normal<f64>,
}

impl ChannelModel {
    pub fn new(params: ChannelParams) -> Result<Self, ConfigError> {
        params.validate()?;
        let shadowing = Normal::new(0.0, params.shadowing_sigma_db).map_err(|_| {
            ConfigError::InvalidChannelParameter {
                name: "shadowing_sigma_db",
                value: params.shadowing_sigma_db,
            }
        })?;
        Ok(Self { params, shadowing })
    }

    pub fn params(&self) -> &ChannelParams {
        &self.params
    }

    /// Draw one shadowing term X_sigma in dB. Always consumes the RNG, even when
    /// sigma is zero, so the random stream does not depend on configuration.
    pub fn sample_shadowing<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.shadowing.sample(rng)
    }

    /// Deterministic part of the log-distance path loss. Distances below d0 are clamped.
    pub fn mean_path_loss_db(&self, distance_m: f64) -> f64 {
        let d0 = self.params.reference_distance_m;
        let distance = distance_m.max(d0);
        self.params.reference_loss_db + 10.0 * self.params.path_loss_exponent * (distance / d0).log10()
    }

    pub fn snr_threshold_db(&self, sf: SpreadingFactor) -> f64 {
        self.params.snr_thresholds_db[sf.index()]
    }

    /// Logistic packet error probability, decreasing in SNR.
    pub fn packet_error_probability(&self, snr_db: f64, sf: SpreadingFactor) -> f64 {
        let margin = snr_db - self.snr_threshold_db(sf);
        let per = 1.0 / (1.0 + (self.params.per_steepness * margin).exp());
        per.clamp(0.0, 1.0)
    }

    pub fn evaluate(
        &self,
        distance_m: f64,
        tx_power_dbm: f64,
        sf: SpreadingFactor,
        shadowing_db: f64,
    ) -> LinkQuality {
        let path_loss_db = self.mean_path_loss_db(distance_m) + shadowing_db;
        let rssi_dbm = tx_power_dbm - path_loss_db;
        let snr_db = rssi_dbm - self.params.noise_floor_dbm;
        LinkQuality {
            path_loss_db,
            rssi_dbm,
            snr_db,
            per: self.packet_error_probability(snr_db, sf),
        }
    }

    /// Distance at which the mean SNR falls to the spreading factor's threshold,
    /// ignoring shadowing. Returns 0 when the link budget cannot cover d0.
    pub fn max_range_m(&self, sf: SpreadingFactor, tx_power_dbm: f64) -> f64 {
        let allowed_loss = tx_power_dbm - self.params.noise_floor_dbm - self.snr_threshold_db(sf);
        let excess = allowed_loss - self.params.reference_loss_db;
        if excess < 0.0 {
            return 0.0;
        }
        self.params.reference_distance_m * 10.0_f64.powf(excess / (10.0 * self.params.path_loss_exponent))
    }
}

/// WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let phi1 = self.latitude.to_radians();
        let phi2 = other.latitude.to_radians();
        let delta_phi = (other.latitude - self.latitude).to_radians();
        let delta_lambda = (other.longitude - self.longitude).to_radians();

        let a = (delta_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }

    /// Point `meters` due north of this one.
    pub fn north_by(&self, meters: f64) -> GeoPoint {
        GeoPoint::new(self.latitude + (meters / EARTH_RADIUS_M).to_degrees(), self.longitude)
    }
}
