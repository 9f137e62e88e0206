//! The room state machine.
//!
//! A [`Room`] owns its clients, players, settings and connection links,
//! and changes them only inside [`Room::tick`]. Each tick runs, in order:
//!
//! 1. timers (list refresh, lobby-ready, stage load, auto start, auto
//!    return, per-player race timeouts)
//! 2. queued admin commands
//! 3. heartbeat probes and the missed-heartbeat kick
//! 4. every link's inbound queue, dispatched by frame and message kind
//!
//! All time is read from the room's [`Clock`] once at the start of a tick.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use raceway_protocol::{
    CharacterId, ChatKind, ClientFrame, ClientId, ClientInfo, ControlSlot,
    JsonCodec, MatchMessage, MatchSettings, MatchState, RoomId, ServerFrame,
    timestamp_millis,
};
use raceway_transport::{Connection, ConnectionId};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::handle::RoomInfo;
use crate::link::{Link, SHUTDOWN_REASON};
use crate::queue::Priority;
use crate::registry::{Client, DISQUALIFIED_POSITION, Player, Registry};
use crate::store::SettingsStore;
use crate::timer::RoomTimers;
use crate::{RoomConfig, RoomError, RoomState, catalog, console, rotation};

const HANDSHAKE_REJECTED: &str = "Invalid client info! You are likely using a different game version than the server.";
const STAGE_LOAD_TIMEOUT_REASON: &str = "Took too long to load the race";
const HEARTBEAT_TIMEOUT_REASON: &str = "You're too slow!";
const CLIENT_DISCONNECTED: &str = "Client disconnected";

fn secs(s: u32) -> Duration {
    Duration::from_secs(u64::from(s))
}

/// One race room.
pub struct Room {
    id: RoomId,
    config: RoomConfig,
    state: RoomState,
    settings: MatchSettings,
    registry: Registry,
    links: BTreeMap<ConnectionId, Link>,
    timers: RoomTimers,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    /// Admin command lines waiting for the next tick.
    commands: VecDeque<String>,
    store: Option<Box<dyn SettingsStore>>,
    debug: bool,
    /// Flipped on disposal; every link watches it.
    cancel: watch::Sender<bool>,
    info: watch::Sender<RoomInfo>,
    finishers: u32,
    now: Instant,
}

impl Room {
    pub fn new(id: RoomId, config: RoomConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let now = clock.now();
        let (cancel, _) = watch::channel(false);
        let (info, _) = watch::channel(RoomInfo {
            id,
            name: config.name.clone(),
            visible: config.visible,
            max_players: config.max_players,
            current_players: 0,
            in_game: false,
        });
        Self {
            id,
            config,
            state: RoomState::Lobby,
            settings: MatchSettings::default(),
            registry: Registry::default(),
            links: BTreeMap::new(),
            timers: RoomTimers::default(),
            clock,
            rng: StdRng::from_os_rng(),
            commands: VecDeque::new(),
            store: None,
            debug: false,
            cancel,
            info,
            finishers: 0,
            now,
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.now = clock.now();
        self.clock = clock;
        self
    }

    /// Attaches a settings store and loads saved settings from it.
    pub fn with_store(mut self, store: Box<dyn SettingsStore>) -> Self {
        match store.load() {
            Ok(Some(settings)) => self.settings = settings,
            Ok(None) => {}
            Err(e) => {
                warn!(room_id = %self.id, error = %e, "failed to load settings, using defaults");
            }
        }
        self.store = Some(store);
        self
    }

    pub fn with_settings(mut self, settings: MatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Seeds the rotation RNG, for reproducible stage and tier picks.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub fn clients(&self) -> &[Client] {
        self.registry.clients()
    }

    pub fn players(&self) -> &[Player] {
        self.registry.players()
    }

    pub fn connection_count(&self) -> usize {
        self.links.len()
    }

    /// Last measured round trip on `conn`.
    pub fn ping(&self, conn: ConnectionId) -> Option<Duration> {
        self.links.get(&conn).and_then(|l| l.ping)
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Seconds left on the auto-start countdown, or 0 when it is stopped.
    pub fn auto_start_time_left(&self) -> f64 {
        if !self.timers.auto_start.is_running() {
            return 0.0;
        }
        secs(self.settings.auto_start_time)
            .saturating_sub(self.timers.auto_start.elapsed(self.now))
            .as_secs_f64()
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            name: self.config.name.clone(),
            visible: self.config.visible,
            max_players: self.config.max_players,
            current_players: self.registry.client_count(),
            in_game: self.state.is_racing(),
        }
    }

    /// Room metadata, updated after every tick that changes it.
    pub fn subscribe(&self) -> watch::Receiver<RoomInfo> {
        self.info.subscribe()
    }

    pub(crate) fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Full snapshot, as sent to a client after its handshake.
    pub fn snapshot(&self) -> MatchState {
        MatchState {
            clients: self.registry.clients().iter().map(Client::state).collect(),
            players: self.registry.players().iter().map(Player::state).collect(),
            settings: self.settings.clone(),
            in_race: self.state.is_racing(),
            auto_start_time_left: self.auto_start_time_left(),
        }
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    /// Admits a new connection. It must complete the handshake before
    /// anything else it sends is accepted.
    pub fn attach<C: Connection>(&mut self, conn: C) -> ConnectionId {
        let link = Link::spawn(conn, self.cancel_signal(), self.config.send_timeout);
        self.adopt(link)
    }

    pub(crate) fn adopt(&mut self, link: Link) -> ConnectionId {
        let conn = link.id();
        debug!(room_id = %self.id, conn_id = %conn, "connection attached");
        self.links.insert(conn, link);
        conn
    }

    /// Runs an admin command line directly and returns its reply.
    pub fn execute_command(&mut self, line: &str) -> String {
        console::execute(self, line)
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Runs one iteration of the room loop.
    pub fn tick(&mut self) {
        self.now = self.clock.now();
        self.update_timers();
        self.run_commands();
        self.update_heartbeats();
        self.drain_links();
        self.publish_info();
    }

    fn update_timers(&mut self) {
        let now = self.now;

        if !self.timers.list_ping.is_running()
            || self.timers.list_ping.reached(now, self.config.list_ping_interval)
        {
            self.timers.list_ping.restart(now);
            let info = self.info();
            debug!(
                room_id = %self.id,
                players = info.current_players,
                in_game = info.in_game,
                "advertising room"
            );
            self.info.send_replace(info);
        }

        if self.timers.lobby_ready.reached(now, self.config.lobby_ready_delay) {
            info!(room_id = %self.id, "all players ready");
            self.load_race();
        }

        if self.timers.stage_load.reached(now, self.config.stage_load_timeout) {
            self.stage_load_timed_out();
        }

        if self.timers.auto_start.reached(now, secs(self.settings.auto_start_time)) {
            info!(room_id = %self.id, "auto start countdown elapsed");
            self.load_race();
        }

        if self.timers.auto_return.reached(now, secs(self.settings.auto_return_time)) {
            self.return_to_lobby();
        }

        self.check_race_timeouts();
    }

    fn stage_load_timed_out(&mut self) {
        let stragglers: Vec<(ConnectionId, String)> = self
            .registry
            .clients()
            .iter()
            .filter(|c| c.loading_stage)
            .map(|c| (c.conn, c.name.clone()))
            .collect();
        for (conn, name) in stragglers {
            warn!(room_id = %self.id, client = %name, "stage load timed out");
            self.disconnect_connection(conn, STAGE_LOAD_TIMEOUT_REASON);
        }
        // The last kick may already have started the race.
        if self.state.is_racing() && self.timers.stage_load.is_running() {
            self.begin_race();
        }
    }

    fn check_race_timeouts(&mut self) {
        let dq_time = self.settings.disqualification_time;
        if !self.state.is_racing() || dq_time == 0 {
            return;
        }
        let limit = secs(dq_time);
        let now = self.now;

        let mut warnings = Vec::new();
        let mut disqualified = Vec::new();
        for player in self.registry.players_mut() {
            if !player.racing || !player.race_timeout.is_running() {
                continue;
            }
            let idle = player.race_timeout.elapsed(now);
            if idle > limit / 2 && !player.warning_sent {
                player.warning_sent = true;
                warnings.push((player.client_id, player.ctrl));
            }
            if idle > limit {
                disqualified.push((player.client_id, player.ctrl));
            }
        }

        for (client_id, ctrl) in warnings {
            debug!(room_id = %self.id, %client_id, %ctrl, "race timeout warning");
            self.broadcast(
                &MatchMessage::RaceTimeout {
                    client_id,
                    ctrl,
                    time_left: f64::from(dq_time) / 2.0,
                },
                Priority::STATE,
            );
        }
        for (client_id, ctrl) in disqualified {
            info!(room_id = %self.id, %client_id, %ctrl, "player disqualified");
            self.broadcast(
                &MatchMessage::DoneRacing {
                    client_id,
                    ctrl,
                    race_time: 0.0,
                    disqualified: true,
                },
                Priority::STATE,
            );
            self.finish_race(client_id, ctrl, true);
        }
    }

    fn run_commands(&mut self) {
        while let Some(line) = self.commands.pop_front() {
            // A command may kick or demote the admin who issued it.
            let admin = self.registry.admin().map(|c| c.conn);
            let reply = console::execute(self, &line);
            if let Some(admin) = admin {
                self.whisper(admin, &reply);
            }
        }
    }

    fn update_heartbeats(&mut self) {
        let now = self.now;
        let probe = !self.timers.heartbeat.is_running()
            || self.timers.heartbeat.reached(now, self.config.heartbeat_interval);
        if probe {
            self.timers.heartbeat.restart(now);
        }
        // Clients block while loading a stage; their silence is not a fault.
        let loading = self.timers.stage_load.is_running();
        let max_missed = self.config.max_missed_heartbeat_ticks;

        let probe_frame = if probe {
            ServerFrame::Heartbeat {
                sent_at: timestamp_millis(),
            }
            .encode(&JsonCodec)
            .ok()
        } else {
            None
        };

        let mut too_slow = Vec::new();
        for link in self.links.values_mut() {
            if link.is_closing() {
                continue;
            }
            match (&probe_frame, link.heartbeat_sent) {
                (Some(bytes), None) => {
                    link.enqueue(bytes.clone(), Priority::STATE);
                    link.heartbeat_sent = Some(now);
                }
                (_, Some(_)) if !loading => {
                    link.missed_ticks += 1;
                    if link.missed_ticks > max_missed {
                        too_slow.push(link.id());
                    }
                }
                _ => {}
            }
        }

        for conn in too_slow {
            warn!(room_id = %self.id, conn_id = %conn, "heartbeat timed out");
            self.disconnect_connection(conn, HEARTBEAT_TIMEOUT_REASON);
        }
    }

    fn drain_links(&mut self) {
        let ids: Vec<ConnectionId> = self.links.keys().copied().collect();
        for conn in ids {
            while let Some(frame) = self.links.get_mut(&conn).and_then(Link::try_recv) {
                if let Err(e) = self.dispatch(conn, frame) {
                    warn!(room_id = %self.id, conn_id = %conn, error = %e, "message rejected");
                    if matches!(e, RoomError::IdentityMismatch { .. }) {
                        self.whisper(conn, "You can't act on behalf of another client.");
                    }
                }
            }
        }
    }

    fn publish_info(&mut self) {
        let next = self.info();
        self.info.send_if_modified(|info| {
            if *info == next {
                false
            } else {
                *info = next;
                true
            }
        });
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    fn dispatch(&mut self, conn: ConnectionId, frame: ClientFrame) -> Result<(), RoomError> {
        match frame {
            ClientFrame::Connect(info) => self.handshake(conn, info),
            ClientFrame::Disconnect { reason } => {
                let reason = reason.unwrap_or_else(|| CLIENT_DISCONNECTED.to_string());
                self.disconnect_connection(conn, &reason);
                Ok(())
            }
            ClientFrame::PlayerMovement(data) => self.relay_movement(conn, data),
            ClientFrame::Heartbeat { .. } => {
                let now = self.now;
                let link = self
                    .links
                    .get_mut(&conn)
                    .ok_or(RoomError::UnknownConnection(conn))?;
                if let Some(sent) = link.heartbeat_sent.take() {
                    link.ping = Some(now.saturating_duration_since(sent));
                }
                link.missed_ticks = 0;
                Ok(())
            }
            ClientFrame::Match { message, .. } => {
                self.require_validated(conn)?;
                if self.debug {
                    info!(room_id = %self.id, conn_id = %conn, kind = message.kind(), "received");
                } else {
                    trace!(room_id = %self.id, conn_id = %conn, kind = message.kind(), "received");
                }
                self.handle_match(conn, message)
            }
        }
    }

    fn require_validated(&self, conn: ConnectionId) -> Result<(), RoomError> {
        match self.links.get(&conn) {
            Some(link) if link.validated => Ok(()),
            Some(_) => Err(RoomError::NotValidated(conn)),
            None => Err(RoomError::UnknownConnection(conn)),
        }
    }

    fn handshake(&mut self, conn: ConnectionId, info: Option<ClientInfo>) -> Result<(), RoomError> {
        let accepted = info.is_some_and(|i| {
            i.version == self.config.game_version && i.is_testing == self.config.testing_build
        });
        if !accepted {
            warn!(room_id = %self.id, conn_id = %conn, ?info, "handshake rejected");
            let link = self.links.get(&conn).ok_or(RoomError::UnknownConnection(conn))?;
            link.send(
                &ServerFrame::Validate {
                    accepted: false,
                    reason: HANDSHAKE_REJECTED.to_string(),
                },
                Priority::CONTROL,
            )?;
            self.disconnect_connection(conn, HANDSHAKE_REJECTED);
            return Ok(());
        }

        let snapshot = ServerFrame::Connect(self.snapshot());
        let link = self
            .links
            .get_mut(&conn)
            .ok_or(RoomError::UnknownConnection(conn))?;
        link.validated = true;
        link.send(&snapshot, Priority::CONTROL)?;
        debug!(room_id = %self.id, conn_id = %conn, "handshake accepted");
        Ok(())
    }

    fn relay_movement(&mut self, conn: ConnectionId, data: Vec<u8>) -> Result<(), RoomError> {
        self.require_validated(conn)?;
        let bytes = ServerFrame::PlayerMovement(data).encode(&JsonCodec)?;
        for link in self.links.values() {
            if link.id() != conn && link.validated {
                link.enqueue(bytes.clone(), Priority::MOVEMENT);
            }
        }
        Ok(())
    }

    fn handle_match(&mut self, conn: ConnectionId, message: MatchMessage) -> Result<(), RoomError> {
        match message {
            MatchMessage::ClientJoined { client_id, name } => {
                self.client_joined(conn, client_id, name)
            }
            MatchMessage::PlayerJoined {
                client_id,
                ctrl,
                character,
            } => self.player_joined(conn, client_id, ctrl, character),
            MatchMessage::PlayerLeft { client_id, ctrl } => {
                self.player_left(conn, client_id, ctrl)
            }
            MatchMessage::CharacterChanged {
                client_id,
                ctrl,
                character,
            } => self.character_changed(conn, client_id, ctrl, character),
            MatchMessage::ChangedReady {
                client_id,
                ctrl,
                ready,
            } => self.changed_ready(conn, client_id, ctrl, ready),
            MatchMessage::StartRace => self.stage_loaded(conn),
            MatchMessage::LoadLobby => self.vote_lobby(conn),
            MatchMessage::Chat { text, .. } => self.chat(conn, text),
            MatchMessage::CheckpointPassed { client_id, ctrl, .. }
            | MatchMessage::PlayerRespawn { client_id, ctrl, .. } => {
                self.race_progress(conn, client_id, ctrl, message)
            }
            MatchMessage::DoneRacing {
                client_id,
                ctrl,
                race_time,
                ..
            } => self.done_racing(conn, client_id, ctrl, race_time),
            other => {
                debug!(
                    room_id = %self.id,
                    conn_id = %conn,
                    kind = other.kind(),
                    "ignoring server-only message"
                );
                Ok(())
            }
        }
    }

    /// Checks that `claimed` is the client registered on `conn`.
    fn verify(&self, conn: ConnectionId, claimed: ClientId) -> Result<(), RoomError> {
        let actual = self.registry.client_by_conn(conn).map(|c| c.id);
        if actual == Some(claimed) {
            Ok(())
        } else {
            Err(RoomError::IdentityMismatch { claimed, actual })
        }
    }

    fn client_joined(&mut self, conn: ConnectionId, client_id: ClientId, name: String) -> Result<(), RoomError> {
        if let Some(existing) = self.registry.client_by_conn(conn) {
            debug!(room_id = %self.id, client = %existing.name, "duplicate join ignored");
            return Ok(());
        }
        if self.registry.client(client_id).is_some() {
            return Err(RoomError::IdentityMismatch {
                claimed: client_id,
                actual: None,
            });
        }
        if self.registry.client_count() >= self.config.max_players {
            info!(room_id = %self.id, client = %name, "room full, refusing client");
            self.send_to(
                conn,
                &MatchMessage::system_chat("The server is full."),
                Priority::CONTROL,
            );
            self.disconnect_connection(conn, "Server is full");
            return Ok(());
        }

        let is_admin = self.registry.add_client(client_id, name.clone(), conn).is_admin;
        info!(room_id = %self.id, client = %name, %client_id, admin = is_admin, "client joined");

        self.broadcast(
            &MatchMessage::ClientJoined {
                client_id,
                name: name.clone(),
            },
            Priority::NORMAL,
        );
        self.announce(format!("{name} has joined the match"));

        if self.config.motd.is_empty() {
            self.whisper(conn, "Welcome to the server!");
        } else {
            let motd = format!("Server's message of the day:\n{}", self.config.motd);
            self.whisper(conn, &motd);
        }
        if is_admin {
            self.whisper(conn, "You are currently the server administrator!");
        }
        self.whisper(conn, self.settings.allowed_tiers.description());
        Ok(())
    }

    fn player_joined(
        &mut self,
        conn: ConnectionId,
        client_id: ClientId,
        ctrl: ControlSlot,
        character: CharacterId,
    ) -> Result<(), RoomError> {
        self.verify(conn, client_id)?;
        let allowed = self.settings.allowed_tiers;
        if !catalog::is_allowed(character, allowed) {
            self.whisper(conn, &format!("You cannot join with this character - {}", allowed.description()));
            return Ok(());
        }
        if !self.registry.add_player(Player::new(client_id, ctrl, character)) {
            debug!(room_id = %self.id, %client_id, %ctrl, "slot already taken");
            return Ok(());
        }
        debug!(room_id = %self.id, %client_id, %ctrl, character, "player joined");
        self.broadcast(
            &MatchMessage::PlayerJoined {
                client_id,
                ctrl,
                character,
            },
            Priority::NORMAL,
        );
        self.refresh_auto_start();
        self.refresh_lobby_ready();
        Ok(())
    }

    fn player_left(&mut self, conn: ConnectionId, client_id: ClientId, ctrl: ControlSlot) -> Result<(), RoomError> {
        self.verify(conn, client_id)?;
        self.registry
            .remove_player(client_id, ctrl)
            .ok_or(RoomError::UnknownPlayer { client_id, ctrl })?;
        debug!(room_id = %self.id, %client_id, %ctrl, "player left");
        self.broadcast(&MatchMessage::PlayerLeft { client_id, ctrl }, Priority::NORMAL);
        self.after_players_removed();
        Ok(())
    }

    fn character_changed(
        &mut self,
        conn: ConnectionId,
        client_id: ClientId,
        ctrl: ControlSlot,
        character: CharacterId,
    ) -> Result<(), RoomError> {
        self.verify(conn, client_id)?;
        let allowed = self.settings.allowed_tiers;
        if !catalog::is_allowed(character, allowed) {
            self.whisper(conn, &format!("You can't use this character - {}", allowed.description()));
            return Ok(());
        }
        let player = self
            .registry
            .player_mut(client_id, ctrl)
            .ok_or(RoomError::UnknownPlayer { client_id, ctrl })?;
        player.character = character;
        self.broadcast(
            &MatchMessage::CharacterChanged {
                client_id,
                ctrl,
                character,
            },
            Priority::NORMAL,
        );
        Ok(())
    }

    fn changed_ready(
        &mut self,
        conn: ConnectionId,
        client_id: ClientId,
        ctrl: ControlSlot,
        ready: bool,
    ) -> Result<(), RoomError> {
        self.verify(conn, client_id)?;
        let player = self
            .registry
            .player_mut(client_id, ctrl)
            .ok_or(RoomError::UnknownPlayer { client_id, ctrl })?;
        player.ready = ready;
        self.broadcast(
            &MatchMessage::ChangedReady {
                client_id,
                ctrl,
                ready,
            },
            Priority::NORMAL,
        );
        self.refresh_lobby_ready();
        Ok(())
    }

    fn stage_loaded(&mut self, conn: ConnectionId) -> Result<(), RoomError> {
        let client = self
            .registry
            .client_by_conn_mut(conn)
            .ok_or(RoomError::NotJoined(conn))?;
        if !client.loading_stage {
            return Ok(());
        }
        client.loading_stage = false;
        debug!(room_id = %self.id, client = %client.name, "stage loaded");

        if self.state.is_racing() && self.timers.stage_load.is_running() && !self.anyone_loading() {
            self.begin_race();
        }
        Ok(())
    }

    fn vote_lobby(&mut self, conn: ConnectionId) -> Result<(), RoomError> {
        if !self.state.is_racing() {
            return Ok(());
        }
        let client = self
            .registry
            .client_by_conn_mut(conn)
            .ok_or(RoomError::NotJoined(conn))?;
        if client.wants_lobby {
            return Ok(());
        }
        client.wants_lobby = true;
        let name = client.name.clone();

        if !self.check_lobby_votes() {
            let (votes, needed) = self.lobby_votes();
            self.announce(format!(
                "{name} wants to return to the lobby. {} more vote(s) needed.",
                needed.saturating_sub(votes)
            ));
        }
        Ok(())
    }

    /// Votes cast and votes needed among the connected clients.
    fn lobby_votes(&self) -> (usize, usize) {
        let votes = self.registry.clients().iter().filter(|c| c.wants_lobby).count();
        let needed = rotation::votes_required(self.registry.client_count(), self.settings.vote_ratio);
        (votes, needed)
    }

    /// Returns to the lobby if the votes already cast meet the threshold.
    /// Re-run whenever a client leaves or the ratio changes.
    pub(crate) fn check_lobby_votes(&mut self) -> bool {
        if !self.state.is_racing() {
            return false;
        }
        let (votes, needed) = self.lobby_votes();
        if votes == 0 || votes < needed {
            return false;
        }
        self.announce("Returning to lobby by user vote.".to_string());
        self.return_to_lobby()
    }

    fn chat(&mut self, conn: ConnectionId, text: String) -> Result<(), RoomError> {
        let client = self
            .registry
            .client_by_conn(conn)
            .ok_or(RoomError::NotJoined(conn))?;
        let (name, is_admin) = (client.name.clone(), client.is_admin);

        if let Some(command) = text.strip_prefix('/').filter(|c| !c.trim().is_empty()) {
            if is_admin {
                info!(room_id = %self.id, client = %name, command, "admin command");
                self.commands.push_back(command.to_string());
            } else {
                warn!(room_id = %self.id, client = %name, command, "command from non-admin");
                self.whisper(conn, "Hey! You can't do that!");
            }
            return Ok(());
        }

        info!(room_id = %self.id, client = %name, %text, "chat");
        self.broadcast(
            &MatchMessage::Chat {
                from: name,
                kind: ChatKind::Player,
                text,
            },
            Priority::NORMAL,
        );
        Ok(())
    }

    fn race_progress(
        &mut self,
        conn: ConnectionId,
        client_id: ClientId,
        ctrl: ControlSlot,
        message: MatchMessage,
    ) -> Result<(), RoomError> {
        self.verify(conn, client_id)?;
        let now = self.now;
        let racing = self.state.is_racing();
        let mut cancel_warning = false;
        if let Some(player) = self.registry.player_mut(client_id, ctrl) {
            if racing && player.racing {
                player.race_timeout.restart(now);
                cancel_warning = std::mem::take(&mut player.warning_sent);
            }
        }
        if cancel_warning {
            self.broadcast(
                &MatchMessage::RaceTimeout {
                    client_id,
                    ctrl,
                    time_left: 0.0,
                },
                Priority::STATE,
            );
        }
        self.broadcast(&message, Priority::NORMAL);
        Ok(())
    }

    fn done_racing(
        &mut self,
        conn: ConnectionId,
        client_id: ClientId,
        ctrl: ControlSlot,
        race_time: f64,
    ) -> Result<(), RoomError> {
        self.verify(conn, client_id)?;
        let player = self
            .registry
            .player(client_id, ctrl)
            .ok_or(RoomError::UnknownPlayer { client_id, ctrl })?;
        if !player.racing {
            debug!(room_id = %self.id, %client_id, %ctrl, "finish from a player not racing");
            return Ok(());
        }
        self.broadcast(
            &MatchMessage::DoneRacing {
                client_id,
                ctrl,
                race_time,
                disqualified: false,
            },
            Priority::NORMAL,
        );
        self.finish_race(client_id, ctrl, false);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Lobby → Racing: tells every client to load the stage.
    pub(crate) fn load_race(&mut self) {
        if self.state.is_racing() {
            return;
        }
        self.timers.lobby_ready.reset();
        self.stop_auto_start();

        info!(
            room_id = %self.id,
            stage = self.settings.stage_id,
            players = self.registry.player_count(),
            "loading race"
        );
        self.state = RoomState::Racing;
        for player in self.registry.players_mut() {
            player.ready = false;
            player.racing = false;
            player.warning_sent = false;
            player.finish_position = None;
            player.race_timeout.reset();
        }
        for client in self.registry.clients_mut() {
            client.loading_stage = true;
            client.wants_lobby = false;
        }
        self.finishers = 0;
        self.timers.auto_return.reset();
        self.timers.stage_load.restart(self.now);
        self.broadcast(&MatchMessage::LoadRace, Priority::STATE);
    }

    /// Every client has the stage loaded (or ran out of time): go.
    fn begin_race(&mut self) {
        self.timers.stage_load.reset();
        if self.registry.players().is_empty() {
            self.return_to_lobby();
            return;
        }
        let now = self.now;
        for player in self.registry.players_mut() {
            player.racing = true;
            player.warning_sent = false;
            player.race_timeout.restart(now);
        }
        info!(room_id = %self.id, players = self.registry.player_count(), "race started");
        self.broadcast(&MatchMessage::StartRace, Priority::CONTROL);
    }

    /// Marks a player's race as over. Returns false if it was not racing.
    fn finish_race(&mut self, client_id: ClientId, ctrl: ControlSlot, disqualified: bool) -> bool {
        let Some(player) = self.registry.player_mut(client_id, ctrl) else {
            return false;
        };
        if !player.racing {
            return false;
        }
        player.racing = false;
        player.race_timeout.reset();
        let cancel_warning = std::mem::take(&mut player.warning_sent) && !disqualified;
        let position = if disqualified {
            DISQUALIFIED_POSITION
        } else {
            self.finishers += 1;
            self.finishers
        };
        player.finish_position = Some(position);
        if !disqualified {
            info!(room_id = %self.id, %client_id, %ctrl, position, "player finished");
        }

        if cancel_warning {
            self.broadcast(
                &MatchMessage::RaceTimeout {
                    client_id,
                    ctrl,
                    time_left: 0.0,
                },
                Priority::STATE,
            );
        }
        self.check_all_finished();
        true
    }

    /// Starts the auto-return countdown once nobody is still racing.
    fn check_all_finished(&mut self) {
        if !self.state.is_racing()
            || self.timers.stage_load.is_running()
            || self.timers.auto_return.is_running()
            || self.settings.auto_return_time == 0
            || self.registry.players().iter().any(|p| p.racing)
        {
            return;
        }
        self.announce(format!(
            "Returning to lobby in {} seconds",
            self.settings.auto_return_time
        ));
        self.timers.auto_return.start(self.now);
    }

    /// Racing → Lobby. Applies stage and tier rotation. Returns false if
    /// the room was already in the lobby.
    pub(crate) fn return_to_lobby(&mut self) -> bool {
        if !self.state.is_racing() {
            debug!(room_id = %self.id, "already in lobby");
            return false;
        }
        info!(room_id = %self.id, "returning to lobby");
        self.state = RoomState::Lobby;
        self.timers.auto_return.reset();
        self.timers.stage_load.reset();
        for player in self.registry.players_mut() {
            player.ready = false;
            player.racing = false;
            player.warning_sent = false;
            player.race_timeout.reset();
        }
        for client in self.registry.clients_mut() {
            client.loading_stage = false;
            client.wants_lobby = false;
        }
        self.broadcast(&MatchMessage::LoadLobby, Priority::STATE);
        self.apply_rotation();
        self.refresh_auto_start();
        true
    }

    fn apply_rotation(&mut self) {
        let old_stage = self.settings.stage_id;
        let old_tiers = self.settings.allowed_tiers;
        let stage = rotation::next_stage(
            self.settings.stage_rotation_mode,
            old_stage,
            self.config.stage_count,
            &mut self.rng,
        );
        let tiers = rotation::next_tiers(self.settings.tier_rotation_mode, old_tiers, &mut self.rng);
        if stage == old_stage && tiers == old_tiers {
            return;
        }

        debug!(room_id = %self.id, stage, %tiers, "rotation applied");
        self.settings.stage_id = stage;
        self.settings.allowed_tiers = tiers;
        self.settings_changed();
        if tiers != old_tiers {
            self.correct_player_tiers();
            self.announce(tiers.description().to_string());
        }
    }

    /// Moves every player on a disallowed character to the first allowed
    /// one.
    pub(crate) fn correct_player_tiers(&mut self) {
        let allowed = self.settings.allowed_tiers;
        let Some(replacement) = catalog::first_allowed(allowed) else {
            return;
        };
        let mut moved = Vec::new();
        for player in self.registry.players_mut() {
            if !catalog::is_allowed(player.character, allowed) {
                player.character = replacement;
                moved.push((player.client_id, player.ctrl));
            }
        }
        for (client_id, ctrl) in moved {
            self.broadcast(
                &MatchMessage::CharacterChanged {
                    client_id,
                    ctrl,
                    character: replacement,
                },
                Priority::NORMAL,
            );
            if let Some(conn) = self.registry.client(client_id).map(|c| c.conn) {
                self.whisper(conn, "Your character is not allowed and has been automatically changed.");
            }
        }
    }

    fn anyone_loading(&self) -> bool {
        self.registry.clients().iter().any(|c| c.loading_stage)
    }

    /// The lobby-ready countdown runs exactly while the room is in the
    /// lobby with at least one player and every player ready.
    fn refresh_lobby_ready(&mut self) {
        let players = self.registry.players();
        let all_ready = !self.state.is_racing() && !players.is_empty() && players.iter().all(|p| p.ready);
        if all_ready {
            self.timers.lobby_ready.start(self.now);
        } else {
            self.timers.lobby_ready.reset();
        }
    }

    /// Starts or stops the auto-start countdown to match the player count.
    pub(crate) fn refresh_auto_start(&mut self) {
        let enough = self.registry.player_count() >= self.settings.auto_start_min_players as usize;
        if enough && !self.state.is_racing() && self.settings.auto_start_time > 0 {
            if !self.timers.auto_start.is_running() {
                self.timers.auto_start.start(self.now);
                debug!(room_id = %self.id, seconds = self.settings.auto_start_time, "auto start countdown started");
                self.broadcast(&MatchMessage::AutoStartTimer { enabled: true }, Priority::STATE);
            }
        } else {
            self.stop_auto_start();
        }
    }

    fn stop_auto_start(&mut self) {
        if self.timers.auto_start.is_running() {
            self.timers.auto_start.reset();
            self.broadcast(&MatchMessage::AutoStartTimer { enabled: false }, Priority::STATE);
        }
    }

    fn after_players_removed(&mut self) {
        if self.state.is_racing() && self.registry.players().is_empty() {
            self.return_to_lobby();
        }
        self.check_lobby_votes();
        self.refresh_auto_start();
        self.refresh_lobby_ready();
        self.check_all_finished();
    }

    /// Removes a connection and its client, and tells the peer why.
    pub(crate) fn disconnect_connection(&mut self, conn: ConnectionId, reason: &str) {
        let Some(link) = self.links.remove(&conn) else {
            return;
        };
        link.disconnect(reason);

        let Some(departure) = self.registry.remove_client(conn) else {
            debug!(room_id = %self.id, conn_id = %conn, %reason, "connection closed before joining");
            return;
        };
        let name = departure.client.name;
        info!(
            room_id = %self.id,
            client = %name,
            players = departure.players_removed,
            %reason,
            "client left"
        );
        self.broadcast(
            &MatchMessage::ClientLeft {
                client_id: departure.client.id,
            },
            Priority::CLIENT_LEFT,
        );
        self.announce(format!("{name} has left the match ({reason})"));

        if let Some(admin) = departure.new_admin.and_then(|id| self.registry.client(id)) {
            info!(room_id = %self.id, client = %admin.name, "admin promoted");
            self.whisper(admin.conn, "You are now the server administrator!");
        }

        self.after_players_removed();
        if self.state.is_racing() && self.timers.stage_load.is_running() && !self.anyone_loading() {
            self.begin_race();
        }
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Applies an admin change, broadcasts it and saves it.
    pub(crate) fn update_settings(&mut self, change: impl FnOnce(&mut MatchSettings)) {
        change(&mut self.settings);
        self.settings_changed();
    }

    fn settings_changed(&mut self) {
        self.broadcast(
            &MatchMessage::SettingsChanged {
                settings: self.settings.clone(),
            },
            Priority::NORMAL,
        );
        self.save_settings();
    }

    fn save_settings(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.settings) {
                warn!(room_id = %self.id, error = %e, "failed to save settings");
            }
        }
    }

    pub(crate) fn toggle_debug(&mut self) -> bool {
        self.debug = !self.debug;
        info!(room_id = %self.id, debug = self.debug, "debug mode toggled");
        self.debug
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    fn encode(&self, message: &MatchMessage) -> Option<Vec<u8>> {
        match ServerFrame::matched(message.clone()).encode(&JsonCodec) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(room_id = %self.id, kind = message.kind(), error = %e, "failed to encode message");
                None
            }
        }
    }

    /// Sends to every joined client.
    pub(crate) fn broadcast(&self, message: &MatchMessage, priority: Priority) {
        let Some(bytes) = self.encode(message) else {
            return;
        };
        if self.debug {
            info!(room_id = %self.id, kind = message.kind(), "broadcast");
        } else {
            trace!(room_id = %self.id, kind = message.kind(), "broadcast");
        }
        for client in self.registry.clients() {
            if let Some(link) = self.links.get(&client.conn) {
                link.enqueue(bytes.clone(), priority);
            }
        }
    }

    fn send_to(&self, conn: ConnectionId, message: &MatchMessage, priority: Priority) {
        let Some(link) = self.links.get(&conn) else {
            return;
        };
        if let Some(bytes) = self.encode(message) {
            if self.debug {
                info!(room_id = %self.id, conn_id = %conn, kind = message.kind(), "send");
            } else {
                trace!(room_id = %self.id, conn_id = %conn, kind = message.kind(), "send");
            }
            link.enqueue(bytes, priority);
        }
    }

    /// A system chat line for one connection.
    pub(crate) fn whisper(&self, conn: ConnectionId, text: &str) {
        self.send_to(conn, &MatchMessage::system_chat(text), Priority::NORMAL);
    }

    /// A system chat line for everyone.
    pub(crate) fn announce(&self, text: String) {
        info!(room_id = %self.id, "{text}");
        self.broadcast(&MatchMessage::system_chat(text), Priority::NORMAL);
    }

    // -----------------------------------------------------------------------
    // Disposal
    // -----------------------------------------------------------------------

    /// Saves settings, says goodbye to every connection and waits up to
    /// `dispose_grace` for them to close before cutting them off.
    pub async fn dispose(&mut self) {
        info!(room_id = %self.id, connections = self.links.len(), "disposing room");
        self.save_settings();
        self.cancel.send_replace(true);
        for link in self.links.values() {
            link.disconnect(SHUTDOWN_REASON);
        }

        let mut signals: Vec<watch::Receiver<bool>> =
            self.links.values().map(Link::closed_signal).collect();
        let all_closed = async {
            for signal in &mut signals {
                let _ = signal.wait_for(|closed| *closed).await;
            }
        };
        if tokio::time::timeout(self.config.dispose_grace, all_closed).await.is_err() {
            warn!(room_id = %self.id, "connections did not close within the grace period");
        }

        for link in self.links.values() {
            link.abort();
        }
        self.links.clear();
        self.registry = Registry::default();
        self.commands.clear();
        self.state = RoomState::Lobby;
        self.publish_info();
    }
}
