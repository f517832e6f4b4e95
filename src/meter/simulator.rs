// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/wattscope

//! Meter simulator for demo/testing

use async_trait::async_trait;
use anyhow::Result;
use chrono::Utc;
use rand::prelude::*;
use rand_distr::Normal;

use super::{MeterSource, MeterStatus, Sample};

/// One simulated load on the virtual circuit.
struct SimulatedLoad {
    name: &'static str,
    power: f64,
    power_factor: f64,
    on: bool,
    switch_probability: f64,
}

/// Simulates a household metering point: a noisy baseline plus a handful of
/// appliances that switch on and off at random, producing the sharp steps
/// the detection pipeline looks for.
pub struct MeterSimulator {
    id: String,
    sample_rate: f64,
    status: MeterStatus,
    rng: rand::rngs::StdRng,

    baseline: f64,
    noise_level: f64,
    mains_voltage: f64,
    energy_wh: f64,
    loads: Vec<SimulatedLoad>,
}

impl MeterSimulator {
    pub fn new(id: &str, sample_rate: f64) -> Self {
        let loads = vec![
            SimulatedLoad { name: "fridge", power: 120.0, power_factor: 0.75, on: true, switch_probability: 0.004 },
            SimulatedLoad { name: "microwave", power: 1100.0, power_factor: 0.85, on: false, switch_probability: 0.002 },
            SimulatedLoad { name: "kettle", power: 1500.0, power_factor: 0.97, on: false, switch_probability: 0.002 },
            SimulatedLoad { name: "washing machine", power: 420.0, power_factor: 0.78, on: false, switch_probability: 0.001 },
            SimulatedLoad { name: "toaster", power: 1300.0, power_factor: 0.97, on: false, switch_probability: 0.001 },
        ];

        Self {
            id: id.to_string(),
            sample_rate,
            status: MeterStatus::Disconnected,
            rng: rand::rngs::StdRng::from_entropy(),
            baseline: 85.0,
            noise_level: 2.5,
            mains_voltage: 230.0,
            energy_wh: 0.0,
            loads,
        }
    }

    fn step(&mut self) -> Sample {
        // Random appliance switching
        for load in &mut self.loads {
            if self.rng.gen::<f64>() < load.switch_probability {
                load.on = !load.on;
            }
        }

        let active_power: f64 = self.loads.iter().filter(|l| l.on).map(|l| l.power).sum();
        let noise = self.rng.sample::<f64, _>(Normal::new(0.0, self.noise_level).unwrap());
        let power = (self.baseline + active_power + noise).max(0.0);

        // Aggregate power factor weighted by load share
        let weighted_pf: f64 = self
            .loads
            .iter()
            .filter(|l| l.on)
            .map(|l| l.power_factor * l.power)
            .sum::<f64>();
        let power_factor = if active_power > 0.0 {
            (weighted_pf + 0.6 * self.baseline) / (active_power + self.baseline)
        } else {
            0.6
        };

        let voltage = self.mains_voltage + self.rng.sample::<f64, _>(Normal::new(0.0, 0.8).unwrap());
        let current = power / voltage;
        self.energy_wh += power / 3600.0 / self.sample_rate;

        Sample {
            timestamp: Utc::now(),
            power,
            voltage: Some(voltage),
            current: Some(current),
            energy: Some(self.energy_wh),
            frequency: Some(50.0 + self.rng.sample::<f64, _>(Normal::new(0.0, 0.01).unwrap())),
            power_factor: Some(power_factor.clamp(0.0, 1.0)),
            rssi: Some(self.rng.gen_range(-75..-45)),
            heap: Some(self.rng.gen_range(140_000..220_000)),
        }
    }
}

#[async_trait]
impl MeterSource for MeterSimulator {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> MeterStatus {
        self.status
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    async fn connect(&mut self) -> Result<()> {
        self.status = MeterStatus::Active;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.status = MeterStatus::Disconnected;
        Ok(())
    }

    async fn read(&mut self) -> Result<Sample> {
        Ok(self.step())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_valid_samples() {
        let mut sim = MeterSimulator::new("sim-0", 1.0);
        sim.connect().await.unwrap();

        for _ in 0..200 {
            let sample = sim.read().await.unwrap();
            assert!(sample.is_valid());
            assert!(sample.power >= 0.0);
            let pf = sample.power_factor.unwrap();
            assert!((0.0..=1.0).contains(&pf));
        }
    }
}
