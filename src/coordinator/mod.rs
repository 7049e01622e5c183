//! Channel-acquisition coordinator.
//!
//! A single worker task owns the SI store and the acquisition state machine
//! (`Idle → LockingTuner → AwaitingPat → AwaitingPmt → AwaitingEit → Ready`)
//! and sequences demux filtering against table arrivals. Sections are decoded
//! on the hardware side's task and handed over a bounded queue; remote-control
//! commands travel on their own unbounded queue so a section flood can never
//! drop a key press.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::config::Config;
use crate::constants::{
    AUDIO_STREAM_TYPES, DIGIT_ENTRY_WINDOW, EIT_WAIT, EVENT_REFRESH_PERIOD, PAT_WAIT, PID_EIT,
    PID_PAT, PMT_WAIT, RUNNING_STATUS_RUNNING, SECTION_QUEUE_DEPTH, SECTION_RETRY_LIMIT,
    STREAM_TYPE_TELETEXT, TABLE_ID_EIT_PF, TABLE_ID_PAT, TABLE_ID_PMT, TUNER_LOCK_TIMEOUT,
    VIDEO_STREAM_TYPES,
};
use crate::hw::{Driver, LockStatus, StreamHandle};
use crate::osd::Osd;
use crate::selector;
use crate::si::{self, EsEntry, Table, TableKind};
use crate::si_store::SiStore;
use crate::volume::VolumeControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqState {
    Idle,
    LockingTuner,
    AwaitingPat,
    AwaitingPmt,
    AwaitingEit,
    Ready,
    Error,
}

/// Outcome of one successful acquisition; overwritten on every channel
/// switch. `program_number` is the channel index the user navigates with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub program_number: u16,
    pub audio_pid: Option<u16>,
    pub video_pid: Option<u16>,
    pub teletext: bool,
    /// "HH:MM", read as nibbles from the raw EIT start time.
    pub event_time: String,
    pub event_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcqError {
    #[error("tuner did not lock in time")]
    TunerLockTimeout,
    #[error("channel {0} is not present in the PAT")]
    UnknownChannel(u16),
    #[error("{kind} pid {found:#06x} does not match configured {expected:#06x}")]
    PidMismatch {
        kind: &'static str,
        expected: u16,
        found: u16,
    },
    #[error("no matching {0} section arrived")]
    SectionTimeout(TableKind),
    #[error(transparent)]
    Hardware(#[from] crate::hw::HwError),
    #[error("acquisition cancelled by shutdown")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ChannelUp,
    ChannelDown,
    ChannelSwitch(u16),
    Digit(u8),
    VolumeUp,
    VolumeDown,
    ToggleMute,
    ShowInfo,
    Retune,
    Shutdown,
}

enum Msg {
    Table(Table),
    Tuner(LockStatus),
}

enum Inbound {
    Msg(Option<Msg>),
    Cmd(Option<Command>),
    Tick,
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Handle to the worker; commands are non-blocking and safe to call from any
/// thread (a remote-control callback included).
pub struct Coordinator {
    cmd_tx: mpsc::UnboundedSender<Command>,
    worker: tokio::task::JoinHandle<()>,
}

impl Coordinator {
    pub fn start(config: Config, driver: Arc<dyn Driver>, osd: Arc<dyn Osd>) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(SECTION_QUEUE_DEPTH);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        // The section callback only decodes and hands off; it never blocks
        // and never touches coordinator state.
        let sections = msg_tx.clone();
        driver.register_section_callback(Box::new(move |buf: Bytes| {
            match si::decode_section(&buf) {
                Ok(table) => {
                    if sections.try_send(Msg::Table(table)).is_err() {
                        debug!("section queue full, dropping section");
                    }
                }
                Err(e) => debug!("discarding malformed section: {e}"),
            }
        }));
        let lock_tx = msg_tx;
        driver.register_lock_callback(Box::new(move |status| {
            if lock_tx.try_send(Msg::Tuner(status)).is_err() {
                debug!("dropping tuner status update");
            }
        }));

        let channel = config.program_index;
        let worker = Worker {
            config,
            driver,
            osd,
            store: SiStore::default(),
            state: AcqState::Idle,
            current: None,
            channel,
            volume: VolumeControl::default(),
            tuner_locked: false,
            first_acquired: false,
            audio_stream: None,
            video_stream: None,
            msg_rx,
            cmd_rx,
            pending: VecDeque::new(),
            digits: None,
            digit_deadline: None,
            next_refresh: Instant::now() + EVENT_REFRESH_PERIOD,
        };
        let worker = tokio::spawn(worker.run());
        Self { cmd_tx, worker }
    }

    pub fn channel_up(&self) {
        self.command(Command::ChannelUp);
    }

    pub fn channel_down(&self) {
        self.command(Command::ChannelDown);
    }

    pub fn channel_switch(&self, channel: u16) {
        self.command(Command::ChannelSwitch(channel));
    }

    pub fn digit(&self, digit: u8) {
        self.command(Command::Digit(digit));
    }

    pub fn volume_up(&self) {
        self.command(Command::VolumeUp);
    }

    pub fn volume_down(&self) {
        self.command(Command::VolumeDown);
    }

    pub fn toggle_mute(&self) {
        self.command(Command::ToggleMute);
    }

    pub fn show_info(&self) {
        self.command(Command::ShowInfo);
    }

    pub fn retune(&self) {
        self.command(Command::Retune);
    }

    fn command(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            warn!("coordinator worker is gone, dropping {cmd:?}");
        }
    }

    /// Interrupts any in-progress wait and joins the worker; hardware
    /// resources are released before this returns.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Err(e) = self.worker.await {
            error!("coordinator worker panicked: {e}");
        }
    }
}

struct Worker {
    config: Config,
    driver: Arc<dyn Driver>,
    osd: Arc<dyn Osd>,
    store: SiStore,
    state: AcqState,
    current: Option<ResolvedChannel>,
    channel: u16,
    volume: VolumeControl,
    tuner_locked: bool,
    first_acquired: bool,
    audio_stream: Option<StreamHandle>,
    video_stream: Option<StreamHandle>,
    msg_rx: mpsc::Receiver<Msg>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    pending: VecDeque<Command>,
    digits: Option<u16>,
    digit_deadline: Option<Instant>,
    next_refresh: Instant,
}

impl Worker {
    async fn run(mut self) {
        match self.acquire().await {
            Ok(()) => {}
            Err(AcqError::Cancelled) => {
                self.teardown();
                return;
            }
            Err(e) => {
                error!("initial acquisition failed: {e}");
                self.set_state(AcqState::Error);
            }
        }

        loop {
            while let Some(cmd) = self.pending.pop_front() {
                if self.handle_command(cmd).await == Flow::Exit {
                    self.teardown();
                    return;
                }
            }

            let deadline = self.next_deadline();
            let inbound = {
                let msg_rx = &mut self.msg_rx;
                let cmd_rx = &mut self.cmd_rx;
                tokio::select! {
                    cmd = cmd_rx.recv() => Inbound::Cmd(cmd),
                    msg = msg_rx.recv() => Inbound::Msg(msg),
                    _ = sleep_until(deadline) => Inbound::Tick,
                }
            };
            match inbound {
                Inbound::Cmd(Some(cmd)) => {
                    if self.handle_command(cmd).await == Flow::Exit {
                        self.teardown();
                        return;
                    }
                }
                Inbound::Msg(Some(Msg::Table(table))) => {
                    // acquisition is complete, unsolicited arrivals are ignored
                    debug!("ignoring unsolicited {} section", table.kind());
                }
                Inbound::Msg(Some(Msg::Tuner(status))) => {
                    debug!("tuner status while idle: {status:?}");
                }
                Inbound::Cmd(None) | Inbound::Msg(None) => {
                    self.teardown();
                    return;
                }
                Inbound::Tick => {
                    if self.on_tick().await == Flow::Exit {
                        self.teardown();
                        return;
                    }
                }
            }
        }
    }

    /// Runs the full filter/await/validate sequence for the current channel.
    async fn acquire(&mut self) -> Result<(), AcqError> {
        self.ensure_locked().await?;

        self.set_state(AcqState::AwaitingPat);
        self.store.invalidate_channel_tables();
        self.fetch_table(TableKind::Pat, PID_PAT, TABLE_ID_PAT, PAT_WAIT, &|t| {
            matches!(t, Table::Pat(_))
        })
        .await?;

        let Some(target) = self.store.entry_for_channel(self.channel) else {
            return Err(AcqError::UnknownChannel(self.channel));
        };
        let program = target.program_number;

        self.set_state(AcqState::AwaitingPmt);
        let accept_pmt =
            move |t: &Table| matches!(t, Table::Pmt(p) if p.header.program_number == program);
        self.fetch_table(TableKind::Pmt, target.pid, TABLE_ID_PMT, PMT_WAIT, &accept_pmt)
            .await?;

        let (audio_pid, video_pid, teletext) = match self.store.pmt() {
            Some(pmt) => classify_streams(&pmt.streams),
            None => return Err(AcqError::SectionTimeout(TableKind::Pmt)),
        };
        if !self.first_acquired {
            // configured pids are a contract only until the first success
            if let Some(found) = video_pid {
                if found != self.config.video_pid {
                    return Err(AcqError::PidMismatch {
                        kind: "video",
                        expected: self.config.video_pid,
                        found,
                    });
                }
            }
            if let Some(found) = audio_pid {
                if found != self.config.audio_pid {
                    return Err(AcqError::PidMismatch {
                        kind: "audio",
                        expected: self.config.audio_pid,
                        found,
                    });
                }
            }
        }
        self.replace_streams(audio_pid, video_pid)?;

        self.set_state(AcqState::AwaitingEit);
        let accept_eit = move |t: &Table| {
            matches!(t, Table::Eit(e) if e.header.service_id == program
                && e.events.first().is_some_and(|ev| ev.running_status == RUNNING_STATUS_RUNNING))
        };
        self.fetch_table(TableKind::Eit, PID_EIT, TABLE_ID_EIT_PF, EIT_WAIT, &accept_eit)
            .await?;

        let (event_time, event_name) = match self.store.running_event(program) {
            Some(ev) => (
                format_event_time(ev.start_time),
                ev.name.clone().unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        };

        let resolved = ResolvedChannel {
            program_number: self.channel,
            audio_pid,
            video_pid,
            teletext,
            event_time,
            event_name,
        };
        info!(
            "channel {} resolved: video {video_pid:?}, audio {audio_pid:?}, teletext {teletext}",
            self.channel
        );
        self.current = Some(resolved.clone());
        self.set_state(AcqState::Ready);
        self.first_acquired = true;
        self.next_refresh = Instant::now() + EVENT_REFRESH_PERIOD;
        self.osd.channel_resolved(&resolved);
        Ok(())
    }

    async fn ensure_locked(&mut self) -> Result<(), AcqError> {
        if self.tuner_locked {
            return Ok(());
        }
        self.set_state(AcqState::LockingTuner);
        self.driver.lock_frequency(
            self.config.frequency_hz,
            self.config.bandwidth_mhz,
            self.config.delivery_system,
        )?;
        self.await_lock().await?;
        info!("tuner locked at {} Hz", self.config.frequency_hz);
        self.tuner_locked = true;
        Ok(())
    }

    async fn await_lock(&mut self) -> Result<(), AcqError> {
        let deadline = Instant::now() + TUNER_LOCK_TIMEOUT;
        loop {
            let inbound = {
                let msg_rx = &mut self.msg_rx;
                let cmd_rx = &mut self.cmd_rx;
                tokio::select! {
                    cmd = cmd_rx.recv() => Inbound::Cmd(cmd),
                    msg = msg_rx.recv() => Inbound::Msg(msg),
                    _ = sleep_until(deadline) => Inbound::Tick,
                }
            };
            match inbound {
                Inbound::Msg(Some(Msg::Tuner(LockStatus::Locked))) => return Ok(()),
                Inbound::Msg(Some(Msg::Tuner(LockStatus::NotLocked))) => {
                    debug!("tuner reports not locked, still waiting");
                }
                Inbound::Msg(Some(Msg::Table(table))) => self.absorb(table),
                Inbound::Cmd(Some(Command::Shutdown)) => return Err(AcqError::Cancelled),
                Inbound::Cmd(Some(cmd)) => self.pending.push_back(cmd),
                Inbound::Msg(None) | Inbound::Cmd(None) => return Err(AcqError::Cancelled),
                Inbound::Tick => return Err(AcqError::TunerLockTimeout),
            }
        }
    }

    /// Arms the filter, awaits an accepted section, frees the filter; the
    /// bounded wait is retried with a fresh filter a few times because a
    /// single repetition interval can straddle a carousel gap.
    async fn fetch_table(
        &mut self,
        kind: TableKind,
        pid: u16,
        table_id: u8,
        wait: Duration,
        accept: &(dyn Fn(&Table) -> bool + Send + Sync),
    ) -> Result<(), AcqError> {
        for attempt in 1..=SECTION_RETRY_LIMIT {
            let filter = self.driver.set_filter(pid, table_id)?;
            let result = self.await_section(kind, wait, accept).await;
            if let Err(e) = self.driver.free_filter(filter) {
                warn!("freeing {kind} filter failed: {e}");
            }
            match result {
                Ok(()) => return Ok(()),
                Err(AcqError::SectionTimeout(_)) if attempt < SECTION_RETRY_LIMIT => {
                    warn!("{kind} did not arrive within {wait:?} (attempt {attempt}), re-arming");
                }
                Err(e) => return Err(e),
            }
        }
        Err(AcqError::SectionTimeout(kind))
    }

    async fn await_section(
        &mut self,
        kind: TableKind,
        wait: Duration,
        accept: &(dyn Fn(&Table) -> bool + Send + Sync),
    ) -> Result<(), AcqError> {
        let deadline = Instant::now() + wait;
        loop {
            let inbound = {
                let msg_rx = &mut self.msg_rx;
                let cmd_rx = &mut self.cmd_rx;
                tokio::select! {
                    cmd = cmd_rx.recv() => Inbound::Cmd(cmd),
                    msg = msg_rx.recv() => Inbound::Msg(msg),
                    _ = sleep_until(deadline) => Inbound::Tick,
                }
            };
            match inbound {
                Inbound::Msg(Some(Msg::Table(table))) => {
                    let wanted = accept(&table);
                    self.absorb(table);
                    if wanted {
                        return Ok(());
                    }
                }
                Inbound::Msg(Some(Msg::Tuner(status))) => {
                    debug!("tuner status while awaiting {kind}: {status:?}");
                }
                Inbound::Cmd(Some(Command::Shutdown)) => return Err(AcqError::Cancelled),
                Inbound::Cmd(Some(cmd)) => self.pending.push_back(cmd),
                Inbound::Msg(None) | Inbound::Cmd(None) => return Err(AcqError::Cancelled),
                Inbound::Tick => return Err(AcqError::SectionTimeout(kind)),
            }
        }
    }

    fn set_state(&mut self, next: AcqState) {
        debug!("acquisition state {:?} -> {next:?}", self.state);
        self.state = next;
    }

    fn absorb(&mut self, table: Table) {
        if table.capacity_exceeded() {
            warn!(
                "{} section exceeded entry capacity, keeping a partial table",
                table.kind()
            );
        }
        self.store.absorb(table);
    }

    fn replace_streams(
        &mut self,
        audio_pid: Option<u16>,
        video_pid: Option<u16>,
    ) -> Result<(), AcqError> {
        if let Some(handle) = self.video_stream.take() {
            self.driver.remove_stream(handle)?;
        }
        if let Some(pid) = video_pid {
            self.video_stream = Some(self.driver.create_stream(pid, self.config.video_codec)?);
        }
        if let Some(handle) = self.audio_stream.take() {
            self.driver.remove_stream(handle)?;
        }
        if let Some(pid) = audio_pid {
            self.audio_stream = Some(self.driver.create_stream(pid, self.config.audio_codec)?);
        }
        Ok(())
    }

    async fn handle_command(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::ChannelUp => {
                self.channel = selector::channel_up(self.channel, self.store.service_count());
                info!("channel up -> {}", self.channel);
                self.reacquire().await
            }
            Command::ChannelDown => {
                self.channel = selector::channel_down(self.channel, self.store.service_count());
                info!("channel down -> {}", self.channel);
                self.reacquire().await
            }
            Command::ChannelSwitch(requested) => self.switch_to(requested).await,
            Command::Digit(digit) => {
                let acc = self.digits.take().unwrap_or(0);
                self.digits = Some(selector::push_digit(acc, digit.min(9)));
                self.digit_deadline = Some(Instant::now() + DIGIT_ENTRY_WINDOW);
                Flow::Continue
            }
            Command::VolumeUp => {
                self.volume.up();
                self.apply_volume()
            }
            Command::VolumeDown => {
                self.volume.down();
                self.apply_volume()
            }
            Command::ToggleMute => {
                self.volume.toggle_mute();
                self.apply_volume()
            }
            Command::ShowInfo => {
                match &self.current {
                    Some(current) => self.osd.channel_resolved(current),
                    None => warn!("no channel resolved yet"),
                }
                Flow::Continue
            }
            Command::Retune => self.reacquire().await,
            Command::Shutdown => Flow::Exit,
        }
    }

    async fn switch_to(&mut self, requested: u16) -> Flow {
        match selector::channel_switch(requested, self.store.service_count()) {
            Ok(channel) => {
                info!("switching to channel {channel}");
                self.channel = channel;
                self.reacquire().await
            }
            Err(e) => {
                warn!("rejecting channel switch: {e}");
                Flow::Continue
            }
        }
    }

    async fn reacquire(&mut self) -> Flow {
        match self.acquire().await {
            Ok(()) => Flow::Continue,
            Err(AcqError::Cancelled) => Flow::Exit,
            Err(e) => {
                error!("channel acquisition failed: {e}");
                self.set_state(AcqState::Error);
                Flow::Continue
            }
        }
    }

    fn apply_volume(&mut self) -> Flow {
        if let Err(e) = self.driver.set_volume(self.volume.hw_level()) {
            error!("volume change failed: {e}");
        }
        self.osd
            .volume_changed(self.volume.level(), self.volume.muted());
        Flow::Continue
    }

    async fn on_tick(&mut self) -> Flow {
        let now = Instant::now();
        if let Some(deadline) = self.digit_deadline {
            if now >= deadline {
                self.digit_deadline = None;
                if let Some(entered) = self.digits.take() {
                    return self.switch_to(entered).await;
                }
            }
        }
        if now >= self.next_refresh {
            // keeps the event banner current, standing in for a permanently
            // armed EIT filter
            self.next_refresh = now + EVENT_REFRESH_PERIOD;
            return self.reacquire().await;
        }
        Flow::Continue
    }

    fn next_deadline(&self) -> Instant {
        match self.digit_deadline {
            Some(deadline) if deadline < self.next_refresh => deadline,
            _ => self.next_refresh,
        }
    }

    /// Reverse-acquisition release: playback streams first, the tuner/socket
    /// goes with the driver.
    fn teardown(&mut self) {
        if let Some(handle) = self.audio_stream.take() {
            if let Err(e) = self.driver.remove_stream(handle) {
                warn!("removing audio stream failed: {e}");
            }
        }
        if let Some(handle) = self.video_stream.take() {
            if let Err(e) = self.driver.remove_stream(handle) {
                warn!("removing video stream failed: {e}");
            }
        }
        self.set_state(AcqState::Idle);
        info!("coordinator stopped");
    }
}

/// First video-class and audio-class entries win; teletext is presence-only.
fn classify_streams(streams: &[EsEntry]) -> (Option<u16>, Option<u16>, bool) {
    let mut audio = None;
    let mut video = None;
    let mut teletext = false;
    for es in streams {
        if VIDEO_STREAM_TYPES.contains(&es.stream_type) {
            if video.is_none() {
                video = Some(es.elementary_pid);
            }
        } else if AUDIO_STREAM_TYPES.contains(&es.stream_type) {
            if audio.is_none() {
                audio = Some(es.elementary_pid);
            }
        } else if es.stream_type == STREAM_TYPE_TELETEXT {
            teletext = true;
        }
    }
    (audio, video, teletext)
}

/// "HH:MM" from the low four nibbles of the raw start time.
fn format_event_time(start_time: u32) -> String {
    let t = start_time & 0xFFFF;
    format!(
        "{}{}:{}{}",
        (t >> 12) & 0xF,
        (t >> 8) & 0xF,
        (t >> 4) & 0xF,
        t & 0xF
    )
}
