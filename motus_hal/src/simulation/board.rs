//! Simulated stepper board.
//!
//! Implements [`MotionHal`] over a chain of [`ChainDevice`]s, one
//! [`AxisPlant`] per configured axis and a [`GpioBank`]. The clock is
//! manual: [`SimBoard::advance`] integrates the plants and posts sensor
//! events, and every bus transfer costs a fixed number of microseconds.

use tracing::{debug, warn};

use motus_common::hal::driver::{BoardInfo, MotionHal};
use motus_common::hal::registers::{DATAGRAM_LEN, slot_of};
use motus_common::hal::types::{BusError, Pin, SensorEvent, SensorProducer};
use motus_common::motion::config::MachineConfig;
use motus_common::motion::error::DriverFault;
use motus_common::motion::state::AxisId;

use super::device::ChainDevice;
use super::io::GpioBank;
use super::physics::AxisPlant;

/// Bus bit time at 4 MHz [ns].
const BIT_TIME_NS: u64 = 250;

/// Supply voltage reported unless overridden [V].
const NOMINAL_SUPPLY_V: f64 = 24.0;

/// Injected bus misbehaviour for the next transfers.
#[derive(Debug, Clone, Copy, Default)]
struct BusFaults {
    timeouts: u32,
    garbled: u32,
    busy: u32,
}

/// Simulated board.
pub struct SimBoard {
    now_us: u64,
    plant_us: u64,
    devices: Vec<ChainDevice>,
    plants: Vec<AxisPlant>,
    /// Chain position of each axis.
    positions: Vec<usize>,
    gpio: GpioBank,
    sensors: Option<SensorProducer>,
    sensor_period_us: u64,
    next_sample_us: u64,
    supply_volts: f64,
    extra_latency_us: u64,
    bus: BusFaults,
    transfers: u64,
    dropped_events: u64,
}

impl SimBoard {
    /// Board matching a machine configuration: one device per axis, in
    /// the axis' configured chain position.
    pub fn new(config: &MachineConfig) -> Self {
        let clock = config.chain.clock();
        let devices = config
            .axes
            .iter()
            .map(|_| ChainDevice::new(config.chain.model, clock))
            .collect();
        Self {
            now_us: 0,
            plant_us: 0,
            devices,
            plants: config.axes.iter().map(AxisPlant::new).collect(),
            positions: config.axes.iter().map(|a| usize::from(a.chain_position)).collect(),
            gpio: GpioBank::default(),
            sensors: None,
            sensor_period_us: u64::from(config.scheduler.tick_us),
            next_sample_us: 0,
            supply_volts: NOMINAL_SUPPLY_V,
            extra_latency_us: 0,
            bus: BusFaults::default(),
            transfers: 0,
            dropped_events: 0,
        }
    }

    /// Post sensor events into `producer` from now on.
    pub fn attach_sensors(&mut self, producer: SensorProducer) {
        self.sensors = Some(producer);
    }

    /// Sensor sampling period [µs].
    pub fn set_sensor_period(&mut self, period_us: u64) {
        self.sensor_period_us = period_us.max(1);
    }

    // ─── Time ───────────────────────────────────────────────────────

    /// Advance the clock by `us`.
    pub fn advance(&mut self, us: u64) {
        self.advance_to(self.now_us + us);
    }

    /// Advance the clock to `target_us` (no-op if already past it).
    ///
    /// Plants are integrated in steps of at most one sensor period and
    /// every due sample is posted.
    pub fn advance_to(&mut self, target_us: u64) {
        let enabled = self.gpio.level(Pin::DriverEnable);
        while self.plant_us < target_us {
            self.sample_if_due();
            let step_end = target_us.min(self.next_sample_us);
            let dt = (step_end - self.plant_us) as f64 * 1e-6;
            for (plant, &p) in self.plants.iter_mut().zip(&self.positions) {
                plant.step(self.devices[p].velocity(), enabled, dt);
            }
            self.plant_us = step_end;
        }
        self.sample_if_due();
        self.now_us = self.now_us.max(target_us);
    }

    fn sample_if_due(&mut self) {
        if self.plant_us >= self.next_sample_us {
            self.post_samples(self.plant_us);
            self.next_sample_us = self.plant_us + self.sensor_period_us;
        }
    }

    fn post(&mut self, event: SensorEvent) {
        let Some(tx) = self.sensors.as_mut() else {
            return;
        };
        if tx.enqueue(event).is_err() {
            self.dropped_events += 1;
        }
    }

    fn post_samples(&mut self, tick_us: u64) {
        for axis in 0..self.plants.len() {
            let plant = &self.plants[axis];
            let id = axis as AxisId;
            let samples = [
                (!plant.sensor_lost).then_some(SensorEvent::AngleSample {
                    axis: id,
                    angle: plant.angle(),
                    tick_us,
                }),
                (!plant.redundant_lost).then_some(SensorEvent::RedundantAngle {
                    axis: id,
                    angle: plant.redundant_angle(),
                    tick_us,
                }),
                (!plant.analog_lost).then_some(SensorEvent::Current {
                    axis: id,
                    amps: plant.current(),
                    tick_us,
                }),
                (!plant.analog_lost).then_some(SensorEvent::Temperature {
                    axis: id,
                    celsius: plant.temperature(),
                    tick_us,
                }),
            ];
            for event in samples.into_iter().flatten() {
                self.post(event);
            }
        }
        self.post(SensorEvent::SupplyVoltage {
            volts: self.supply_volts,
            tick_us,
        });
    }

    // ─── Inspection ─────────────────────────────────────────────────

    /// Unwrapped position of `axis` [units].
    pub fn axis_position(&self, axis: AxisId) -> f64 {
        self.plants.get(usize::from(axis)).map_or(0.0, AxisPlant::position)
    }

    /// Velocity of `axis` [units/s].
    pub fn axis_velocity(&self, axis: AxisId) -> f64 {
        self.plants.get(usize::from(axis)).map_or(0.0, AxisPlant::velocity)
    }

    /// VACTUAL code held by the device at chain `position`.
    pub fn vactual(&self, position: usize) -> i32 {
        self.devices.get(position).map_or(0, ChainDevice::vactual)
    }

    /// Device at chain `position`.
    pub fn device(&self, position: usize) -> Option<&ChainDevice> {
        self.devices.get(position)
    }

    /// Level of `pin`.
    #[inline]
    pub fn pin(&self, pin: Pin) -> bool {
        self.gpio.level(pin)
    }

    /// Completed bus transfers, failed ones included.
    #[inline]
    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    /// Sensor events lost to a full queue.
    #[inline]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    // ─── Stimulus ───────────────────────────────────────────────────

    /// Drive the hardware emergency input; an edge is also posted as an
    /// interrupt event.
    pub fn set_emergency_input(&mut self, asserted: bool) {
        if self.gpio.set(Pin::EmergencyInput, asserted) {
            self.post(SensorEvent::EmergencyInput {
                asserted,
                tick_us: self.now_us,
            });
        }
    }

    /// Drive the operator reset-confirm input.
    pub fn set_reset_confirm(&mut self, level: bool) {
        self.gpio.set(Pin::ResetConfirm, level);
    }

    /// Mutable access to the plant of `axis`.
    pub fn plant_mut(&mut self, axis: AxisId) -> Option<&mut AxisPlant> {
        self.plants.get_mut(usize::from(axis))
    }

    /// Place `axis` at `position`, at rest.
    pub fn set_axis_position(&mut self, axis: AxisId, position: f64) {
        if let Some(p) = self.plant_mut(axis) {
            p.set_position(position);
        }
    }

    /// Reported motor supply voltage [V].
    pub fn set_supply_voltage(&mut self, volts: f64) {
        self.supply_volts = volts;
    }

    /// Set or clear fault flags on the device at chain `position`.
    pub fn inject_fault(&mut self, position: usize, faults: DriverFault, on: bool) {
        if let Some(d) = self.devices.get_mut(position) {
            debug!(position, ?faults, on, "simulated driver fault");
            d.inject(faults, on);
        }
    }

    /// The next `count` transfers time out.
    pub fn fail_transfers(&mut self, count: u32) {
        self.bus.timeouts = count;
    }

    /// The next `count` transfers return an all-ones frame (floating MISO).
    pub fn garble_replies(&mut self, count: u32) {
        self.bus.garbled = count;
    }

    /// The next `count` transfers find the bus busy.
    pub fn hold_bus(&mut self, count: u32) {
        self.bus.busy = count;
    }

    /// Extra time charged to every transfer [µs].
    pub fn set_transfer_latency(&mut self, us: u64) {
        self.extra_latency_us = us;
    }

    fn transfer_cost_us(&self, len: usize) -> u64 {
        (len as u64 * 8 * BIT_TIME_NS).div_ceil(1000) + self.extra_latency_us
    }
}

impl MotionHal for SimBoard {
    fn info(&self) -> BoardInfo {
        BoardInfo {
            name: "simulation",
            chain_length: self.devices.len(),
        }
    }

    fn gpio_read(&mut self, pin: Pin) -> bool {
        self.gpio.level(pin)
    }

    fn gpio_write(&mut self, pin: Pin, level: bool) {
        if self.gpio.set(pin, level) {
            debug!(?pin, level, "gpio output changed");
        }
    }

    fn bus_transfer(&mut self, tx: &[u8], rx: &mut [u8], timeout_us: u32) -> Result<(), BusError> {
        self.transfers += 1;
        if tx.len() != rx.len() {
            return Err(BusError::LengthMismatch);
        }
        if self.bus.busy > 0 {
            self.bus.busy -= 1;
            return Err(BusError::Busy);
        }
        if self.bus.timeouts > 0 {
            self.bus.timeouts -= 1;
            self.now_us += u64::from(timeout_us);
            return Err(BusError::Timeout);
        }
        let cost = self.transfer_cost_us(tx.len());
        if cost > u64::from(timeout_us) {
            self.now_us += u64::from(timeout_us);
            warn!(cost_us = cost, timeout_us, "simulated transfer exceeded its timeout");
            return Err(BusError::Timeout);
        }
        self.now_us += cost;

        let n = self.devices.len();
        if tx.len() != n * DATAGRAM_LEN {
            // Devices shift out whatever is in their registers; the frame is
            // misaligned and the caller's framing check catches it.
            rx.fill(0xFF);
            return Ok(());
        }
        for position in 0..n {
            let start = slot_of(position, n) * DATAGRAM_LEN;
            let mut datagram = [0u8; DATAGRAM_LEN];
            datagram.copy_from_slice(&tx[start..start + DATAGRAM_LEN]);
            let reply = self.devices[position].exchange(&datagram);
            rx[start..start + DATAGRAM_LEN].copy_from_slice(&reply);
        }
        if self.bus.garbled > 0 {
            self.bus.garbled -= 1;
            rx.fill(0xFF);
        }
        Ok(())
    }

    fn get_tick(&self) -> u64 {
        self.now_us
    }

    fn delay(&mut self, ms: u32) {
        self.advance(u64::from(ms) * 1000);
    }
}
