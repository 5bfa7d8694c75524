//! Chain transaction engine.
//!
//! One call to [`ChainEngine::transact`] is one bus transaction carrying
//! exactly one datagram per device. A failed transfer or a malformed reply
//! is retried as a whole frame; a partial retry would misalign the chain.
//!
//! Status polling rides on the same transactions: every
//! `status_poll_interval` transactions the velocity writes are replaced by
//! read requests (DRV_STATUS and GSTAT alternate) and the pipelined data is
//! decoded on the following transaction. Only slots whose driver already
//! holds the commanded value carry the read: a velocity write may wait one
//! transaction, a Stop already in effect is not repeated, but a fresh Stop
//! is always written.

use heapless::Vec as HVec;
use tracing::{debug, info, warn};

use motus_common::consts::MAX_AXES;
use motus_common::hal::driver::MotionHal;
use motus_common::hal::registers::{Register, gconf, gstat};
use motus_common::motion::config::{AxisConfig, ChainConfig};
use motus_common::motion::error::{
    CommunicationError, ConfigurationError, CoreError, DriverFault, TransferFailure,
};

use super::codec::{self, MAX_FRAME_LEN, Replies};
use super::model::{Datagram, DriverCommand, DriverDevice, StatusFlags, encode_ihold_irun};
use crate::control::output::current_code;

/// Decoded result of one successful transaction, in chain-position order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainReply {
    /// Status byte of every device.
    pub status: HVec<StatusFlags, MAX_AXES>,
    /// Faults per device: status-byte flags plus any decoded register data.
    pub faults: HVec<DriverFault, MAX_AXES>,
    /// Register whose pipelined data was decoded in this reply.
    pub polled: Option<Register>,
    /// Per device: register decoded from its slot, if any.
    pub decoded: HVec<Option<Register>, MAX_AXES>,
    /// Attempts used (1 = no retry).
    pub attempts: u8,
}

impl ChainReply {
    /// Faults of the device at `position`.
    #[inline]
    pub fn faults_at(&self, position: usize) -> DriverFault {
        self.faults.get(position).copied().unwrap_or_default()
    }

    /// Register decoded from the device at `position`, if any.
    #[inline]
    pub fn decoded_at(&self, position: usize) -> Option<Register> {
        self.decoded.get(position).copied().flatten()
    }

    #[inline]
    pub fn polled_at(&self, position: usize) -> bool {
        self.decoded_at(position).is_some()
    }
}

/// Transaction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainStats {
    pub transactions: u64,
    pub retries: u64,
    pub failures: u64,
    pub polls: u64,
}

/// Engine for one daisy chain.
#[derive(Debug)]
pub struct ChainEngine {
    device: DriverDevice,
    config: ChainConfig,
    len: usize,
    /// Read request per slot sent in the previous successful transaction.
    pending_read: [Option<Register>; MAX_AXES],
    /// Last VACTUAL write confirmed per slot; `None` when unknown.
    held: [Option<DriverCommand>; MAX_AXES],
    /// Driver-error bit of the previous reply per slot.
    driver_error: [bool; MAX_AXES],
    /// Slots waiting for a DRV_STATUS read after a driver-error edge.
    urgent: [bool; MAX_AXES],
    since_poll: u32,
    next_poll: Register,
    stats: ChainStats,
    rx: [u8; MAX_FRAME_LEN],
}

impl ChainEngine {
    /// Engine for a chain of `len` devices.
    pub fn new(config: &ChainConfig, len: usize) -> Result<Self, ConfigurationError> {
        if len == 0 || len > MAX_AXES {
            return Err(ConfigurationError::OutOfRange {
                field: "chain_length",
                value: len as f64,
                min: 1.0,
                max: MAX_AXES as f64,
            });
        }
        config.validate()?;
        Ok(Self {
            device: DriverDevice::new(config.model, config.clock()),
            config: *config,
            len,
            pending_read: [None; MAX_AXES],
            held: [None; MAX_AXES],
            driver_error: [false; MAX_AXES],
            urgent: [false; MAX_AXES],
            since_poll: 0,
            next_poll: Register::DrvStatus,
            stats: ChainStats::default(),
            rx: [0; MAX_FRAME_LEN],
        })
    }

    #[inline]
    pub fn device(&self) -> &DriverDevice {
        &self.device
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn stats(&self) -> ChainStats {
        self.stats
    }

    /// Bring every device into velocity mode with configured currents and
    /// verify by reading back GSTAT.
    ///
    /// `axes` may be in any order; each axis is placed by its chain position.
    pub fn initialize<H: MotionHal + ?Sized>(
        &mut self,
        hal: &mut H,
        axes: &[AxisConfig],
    ) -> Result<(), CoreError> {
        let board_len = hal.info().chain_length;
        if board_len != self.len || axes.len() != self.len {
            return Err(ConfigurationError::Invalid {
                field: "chain_length",
                reason: "board chain length differs from configured axes",
            }
            .into());
        }

        let mut gconf_words = [0u32; MAX_AXES];
        let mut current_words = [0u32; MAX_AXES];
        for axis in axes {
            let p = usize::from(axis.chain_position);
            let mut word = gconf::INTERNAL_VELOCITY.mask();
            if axis.invert_direction {
                word |= gconf::SHAFT.mask();
            }
            gconf_words[p] = word;
            current_words[p] = encode_ihold_irun(
                current_code(axis.hold_current, axis.full_scale_current),
                current_code(axis.run_current.min(axis.current_limit), axis.full_scale_current),
                self.config.hold_delay,
            )?;
        }

        self.exchange(hal, |p| DriverCommand::Write {
            register: Register::Gconf,
            value: gconf_words[p],
        })?;
        self.exchange(hal, |p| DriverCommand::Write {
            register: Register::IholdIrun,
            value: current_words[p],
        })?;
        self.exchange(hal, |_| DriverCommand::Stop)?;
        self.exchange(hal, |_| DriverCommand::Write {
            register: Register::Gstat,
            value: gstat::CLEAR_ALL,
        })?;
        // Read request, then a second transaction to shift out its data.
        self.exchange(hal, |_| DriverCommand::Read(Register::Gstat))?;
        let reply = self.exchange(hal, |_| DriverCommand::Read(Register::Gstat))?;

        for (position, (status, faults)) in reply.status.iter().zip(reply.faults.iter()).enumerate() {
            if status.reset || faults.contains(DriverFault::RESET) {
                warn!(position, "driver failed configuration read-back");
                return Err(CommunicationError::InitVerify {
                    position: position as u8,
                }
                .into());
            }
        }
        self.since_poll = 0;
        info!(devices = self.len, model = ?self.device.model(), "driver chain initialized");
        Ok(())
    }

    fn exchange<H, F>(&mut self, hal: &mut H, command: F) -> Result<ChainReply, CoreError>
    where
        H: MotionHal + ?Sized,
        F: Fn(usize) -> DriverCommand,
    {
        let mut commands: HVec<DriverCommand, MAX_AXES> = HVec::new();
        for p in 0..self.len {
            let _ = commands.push(command(p));
        }
        self.send(hal, &commands)
    }

    /// Run one transaction. `commands` is indexed by chain position.
    ///
    /// Parameters out of range are rejected before anything is sent.
    pub fn transact<H: MotionHal + ?Sized>(
        &mut self,
        hal: &mut H,
        commands: &[DriverCommand],
    ) -> Result<ChainReply, CoreError> {
        if commands.len() != self.len {
            return Err(ConfigurationError::Invalid {
                field: "commands",
                reason: "one command per chained device required",
            }
            .into());
        }

        self.since_poll = self.since_poll.saturating_add(1);
        let urgent = self.urgent[..self.len].iter().any(|&u| u);
        if urgent || self.since_poll >= self.config.status_poll_interval {
            let register = if urgent { Register::DrvStatus } else { self.next_poll };
            let mut batch: HVec<DriverCommand, MAX_AXES> = HVec::new();
            let mut reads: HVec<usize, MAX_AXES> = HVec::new();
            for (p, command) in commands.iter().enumerate() {
                if self.can_defer(p, command) {
                    // Validate even though the read replaces it.
                    self.device.encode_command(command)?;
                    let _ = batch.push(DriverCommand::Read(register));
                    let _ = reads.push(p);
                } else {
                    let _ = batch.push(*command);
                }
            }
            if !reads.is_empty() {
                let reply = self.send(hal, &batch)?;
                self.stats.polls += 1;
                self.since_poll = 0;
                if register == Register::DrvStatus {
                    for &p in &reads {
                        self.urgent[p] = false;
                    }
                }
                if register == self.next_poll {
                    self.next_poll = match register {
                        Register::DrvStatus => Register::Gstat,
                        _ => Register::DrvStatus,
                    };
                }
                return Ok(reply);
            }
            debug!(?register, "status poll deferred: no slot can carry the read");
        }
        self.send(hal, commands)
    }

    /// A slot may carry a read instead of its command when the driver keeps
    /// an acceptable value meanwhile: any velocity (updated next
    /// transaction) or a Stop it already holds.
    fn can_defer(&self, position: usize, command: &DriverCommand) -> bool {
        match command {
            DriverCommand::Velocity(_) => true,
            DriverCommand::Stop => self.held[position] == Some(DriverCommand::Stop),
            _ => false,
        }
    }

    fn send<H: MotionHal + ?Sized>(
        &mut self,
        hal: &mut H,
        commands: &[DriverCommand],
    ) -> Result<ChainReply, CoreError> {
        let mut datagrams: HVec<Datagram, MAX_AXES> = HVec::new();
        let mut read_requests = [None; MAX_AXES];
        for (p, command) in commands.iter().enumerate() {
            let _ = datagrams.push(self.device.encode_command(command)?);
            if let DriverCommand::Read(r) = command {
                read_requests[p] = Some(*r);
            }
        }
        let tx = codec::encode_frame(&datagrams)?;
        let frame_len = tx.len();

        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut last = TransferFailure::Timeout;
        let mut outcome: Option<(Replies, u8)> = None;
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.stats.retries += 1;
                debug!(attempt, ?last, "retrying chain transaction");
            }
            let rx = &mut self.rx[..frame_len];
            match hal.bus_transfer(&tx, rx, self.config.transfer_timeout_us) {
                Ok(()) => match codec::decode_frame(rx, self.len) {
                    Ok(replies) => {
                        outcome = Some((replies, attempt));
                        break;
                    }
                    Err(_) => last = TransferFailure::Framing,
                },
                Err(e) => last = e.failure(),
            }
        }

        self.stats.transactions += 1;
        let Some((replies, attempts)) = outcome else {
            self.stats.failures += 1;
            self.pending_read = [None; MAX_AXES];
            self.held = [None; MAX_AXES];
            warn!(attempts = max_attempts, ?last, "chain transaction failed");
            return Err(CommunicationError::RetriesExhausted {
                attempts: max_attempts,
                last,
            }
            .into());
        };

        // After a retry the pipelined data may belong to the retried
        // request rather than the previous one; discard it.
        let pending = if attempts == 1 { self.pending_read } else { [None; MAX_AXES] };
        self.pending_read = read_requests;
        for (p, command) in commands.iter().enumerate() {
            if matches!(command, DriverCommand::Velocity(_) | DriverCommand::Stop) {
                self.held[p] = Some(*command);
            }
        }

        let mut reply = ChainReply {
            polled: pending[..self.len].iter().find_map(|r| *r),
            attempts,
            ..Default::default()
        };
        for (p, r) in replies.iter().enumerate() {
            let mut faults = r.status.faults();
            if let Some(register) = pending[p] {
                faults |= self.device.decode_status(register, r.data).faults;
            }
            if r.status.driver_error && !self.driver_error[p] {
                self.urgent[p] = true;
            }
            self.driver_error[p] = r.status.driver_error;
            let _ = reply.status.push(r.status);
            let _ = reply.faults.push(faults);
            let _ = reply.decoded.push(pending[p]);
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motus_common::hal::driver::BoardInfo;
    use motus_common::hal::registers::{DATAGRAM_LEN, slot_of, status_byte};
    use motus_common::hal::types::{BusError, Pin};

    /// Minimal chain model: records frames, answers with a fixed status and
    /// pipelined register data.
    struct ScriptedChain {
        len: usize,
        frames: Vec<Vec<u8>>,
        fail_next: u32,
        status: u8,
        register_data: u32,
        latched: Vec<u32>,
    }

    impl ScriptedChain {
        fn new(len: usize) -> Self {
            Self {
                len,
                frames: Vec::new(),
                fail_next: 0,
                status: 0,
                register_data: 0,
                latched: vec![0; len],
            }
        }
    }

    impl MotionHal for ScriptedChain {
        fn info(&self) -> BoardInfo {
            BoardInfo {
                name: "scripted",
                chain_length: self.len,
            }
        }
        fn gpio_read(&mut self, _pin: Pin) -> bool {
            false
        }
        fn gpio_write(&mut self, _pin: Pin, _level: bool) {}
        fn bus_transfer(&mut self, tx: &[u8], rx: &mut [u8], _timeout_us: u32) -> Result<(), BusError> {
            self.frames.push(tx.to_vec());
            if self.fail_next > 0 {
                self.fail_next -= 1;
                return Err(BusError::Timeout);
            }
            for p in 0..self.len {
                let s = slot_of(p, self.len) * DATAGRAM_LEN;
                rx[s] = self.status;
                rx[s + 1..s + 5].copy_from_slice(&self.latched[p].to_be_bytes());
                if tx[s] & 0x80 == 0 {
                    self.latched[p] = self.register_data;
                }
            }
            Ok(())
        }
        fn get_tick(&self) -> u64 {
            0
        }
        fn delay(&mut self, _ms: u32) {}
    }

    fn engine(len: usize) -> ChainEngine {
        ChainEngine::new(&ChainConfig::default(), len).unwrap()
    }

    #[test]
    fn one_frame_per_transaction() {
        let mut hal = ScriptedChain::new(3);
        let mut eng = engine(3);
        let cmds = [DriverCommand::Velocity(100.0), DriverCommand::Stop, DriverCommand::Velocity(-100.0)];
        let reply = eng.transact(&mut hal, &cmds).unwrap();
        assert_eq!(hal.frames.len(), 1);
        assert_eq!(hal.frames[0].len(), 15);
        assert_eq!(reply.attempts, 1);
        assert_eq!(reply.status.len(), 3);
    }

    #[test]
    fn out_of_range_rejected_before_transmission() {
        let mut hal = ScriptedChain::new(1);
        let mut eng = engine(1);
        let err = eng.transact(&mut hal, &[DriverCommand::Velocity(1.0e9)]).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
        assert!(hal.frames.is_empty());
    }

    #[test]
    fn whole_frame_retried_then_exhausted() {
        let mut hal = ScriptedChain::new(2);
        let mut eng = engine(2);
        hal.fail_next = 2;
        let cmds = [DriverCommand::Velocity(1.0), DriverCommand::Velocity(2.0)];
        let reply = eng.transact(&mut hal, &cmds).unwrap();
        assert_eq!(reply.attempts, 3);
        assert_eq!(hal.frames.len(), 3);
        assert!(hal.frames.iter().all(|f| f == &hal.frames[0]));

        hal.fail_next = 10;
        let err = eng.transact(&mut hal, &cmds).unwrap_err();
        assert_eq!(
            err,
            CoreError::Communication(CommunicationError::RetriesExhausted {
                attempts: 4,
                last: TransferFailure::Timeout,
            })
        );
        assert_eq!(eng.stats().failures, 1);
        assert_eq!(eng.stats().retries, 2 + 3);
    }

    #[test]
    fn poll_replaces_velocity_and_decodes_next_reply() {
        let mut hal = ScriptedChain::new(1);
        let mut eng = engine(1);
        let stall = eng.device().drv_status_word(DriverFault::STALL, false);
        hal.register_data = stall;
        let v = [DriverCommand::Velocity(10.0)];
        let interval = ChainConfig::default().status_poll_interval;
        for _ in 0..interval - 1 {
            assert!(eng.transact(&mut hal, &v).unwrap().polled.is_none());
        }
        // Poll transaction: read request goes out.
        let poll = eng.transact(&mut hal, &v).unwrap();
        assert_eq!(hal.frames.last().unwrap()[0], Register::DrvStatus.address());
        assert!(poll.polled.is_none());
        // Next transaction carries the data.
        let next = eng.transact(&mut hal, &v).unwrap();
        assert_eq!(next.polled, Some(Register::DrvStatus));
        assert!(next.faults_at(0).contains(DriverFault::STALL));
    }

    #[test]
    fn held_stop_carries_the_poll() {
        let mut hal = ScriptedChain::new(1);
        let mut eng = engine(1);
        let interval = ChainConfig::default().status_poll_interval;
        for _ in 0..interval + 2 {
            eng.transact(&mut hal, &[DriverCommand::Stop]).unwrap();
        }
        let stop = Register::Vactual.address() | 0x80;
        assert_eq!(hal.frames[0][0], stop, "the first stop is written");
        assert_eq!(hal.frames[interval as usize - 1][0], Register::DrvStatus.address());
        assert_eq!(eng.stats().polls, 1);
    }

    #[test]
    fn fresh_stop_is_written_during_a_poll() {
        let mut hal = ScriptedChain::new(2);
        let mut eng = engine(2);
        let moving = [DriverCommand::Velocity(100.0), DriverCommand::Velocity(100.0)];
        let interval = ChainConfig::default().status_poll_interval;
        for _ in 1..interval {
            eng.transact(&mut hal, &moving).unwrap();
        }
        eng.transact(&mut hal, &[DriverCommand::Stop, DriverCommand::Velocity(100.0)]).unwrap();
        let frame = hal.frames.last().unwrap();
        assert_eq!(frame[slot_of(0, 2) * DATAGRAM_LEN], Register::Vactual.address() | 0x80);
        assert_eq!(frame[slot_of(1, 2) * DATAGRAM_LEN], Register::DrvStatus.address());
        assert_eq!(eng.stats().polls, 1);

        let next = eng.transact(&mut hal, &moving).unwrap();
        assert!(!next.polled_at(0));
        assert!(next.polled_at(1));
    }

    #[test]
    fn persistent_driver_error_polls_once() {
        let mut hal = ScriptedChain::new(1);
        let mut eng = engine(1);
        hal.status = status_byte::DRIVER_ERROR;
        let v = [DriverCommand::Velocity(10.0)];
        for _ in 0..5 {
            eng.transact(&mut hal, &v).unwrap();
        }
        let reads = hal.frames.iter().filter(|f| f[0] == Register::DrvStatus.address()).count();
        assert_eq!(reads, 1, "the flag edge triggers one urgent poll, not one per transaction");
    }

    #[test]
    fn driver_error_triggers_urgent_poll() {
        let mut hal = ScriptedChain::new(1);
        let mut eng = engine(1);
        hal.status = status_byte::DRIVER_ERROR;
        let v = [DriverCommand::Velocity(0.0)];
        eng.transact(&mut hal, &v).unwrap();
        eng.transact(&mut hal, &v).unwrap();
        assert_eq!(hal.frames[1][0], Register::DrvStatus.address());
    }

    #[test]
    fn initialize_verifies_gstat() {
        let mut hal = ScriptedChain::new(2);
        let mut eng = engine(2);
        let axes = vec![
            AxisConfig::default(),
            AxisConfig {
                chain_position: 1,
                ..AxisConfig::default()
            },
        ];
        eng.initialize(&mut hal, &axes).unwrap();
        assert_eq!(hal.frames.len(), 6);

        let mut bad = ScriptedChain::new(2);
        bad.register_data = 1; // GSTAT reset bit stays set
        let mut eng = engine(2);
        let err = eng.initialize(&mut bad, &axes).unwrap_err();
        assert!(matches!(err, CoreError::Communication(CommunicationError::InitVerify { .. })));
    }

    #[test]
    fn chain_length_mismatch_rejected() {
        let mut hal = ScriptedChain::new(3);
        let mut eng = engine(2);
        let axes = vec![AxisConfig::default()];
        assert!(matches!(
            eng.initialize(&mut hal, &axes),
            Err(CoreError::Configuration(_))
        ));
    }
}
