//! Clients and players present in a room.

use raceway_protocol::{
    CharacterId, ClientId, ClientState, ControlSlot, PlayerState,
};
use raceway_transport::ConnectionId;

use crate::timer::Stopwatch;

/// Finishing position recorded for a disqualified player. Sorts after
/// every real rank.
pub const DISQUALIFIED_POSITION: u32 = u32::MAX;

/// One connected game instance.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub conn: ConnectionId,
    pub is_admin: bool,
    pub loading_stage: bool,
    pub wants_lobby: bool,
}

impl Client {
    pub fn state(&self) -> ClientState {
        ClientState {
            client_id: self.id,
            name: self.name.clone(),
        }
    }
}

/// One racer slot owned by a client.
#[derive(Debug, Clone)]
pub struct Player {
    pub client_id: ClientId,
    pub ctrl: ControlSlot,
    pub character: CharacterId,
    pub ready: bool,
    pub racing: bool,
    /// Time since the last checkpoint while racing.
    pub race_timeout: Stopwatch,
    pub warning_sent: bool,
    pub finish_position: Option<u32>,
}

impl Player {
    pub fn new(
        client_id: ClientId,
        ctrl: ControlSlot,
        character: CharacterId,
    ) -> Self {
        Self {
            client_id,
            ctrl,
            character,
            ready: false,
            racing: false,
            race_timeout: Stopwatch::default(),
            warning_sent: false,
            finish_position: None,
        }
    }

    pub fn state(&self) -> PlayerState {
        PlayerState {
            client_id: self.client_id,
            ctrl: self.ctrl,
            ready: self.ready,
            character: self.character,
        }
    }
}

/// What went away with a client.
#[derive(Debug)]
pub struct Departure {
    pub client: Client,
    pub players_removed: usize,
    /// The client promoted to admin in its place, if any.
    pub new_admin: Option<ClientId>,
}

/// Join-ordered lists of clients and players.
///
/// Every player's `client_id` names a registered client: removing a client
/// removes its players in the same call.
#[derive(Debug, Default)]
pub struct Registry {
    clients: Vec<Client>,
    players: Vec<Player>,
}

impl Registry {
    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    pub fn clients_mut(&mut self) -> impl Iterator<Item = &mut Client> {
        self.clients.iter_mut()
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn players_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.iter_mut()
    }

    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }

    pub fn client_by_conn(&self, conn: ConnectionId) -> Option<&Client> {
        self.clients.iter().find(|c| c.conn == conn)
    }

    pub fn client_by_conn_mut(
        &mut self,
        conn: ConnectionId,
    ) -> Option<&mut Client> {
        self.clients.iter_mut().find(|c| c.conn == conn)
    }

    pub fn admin(&self) -> Option<&Client> {
        self.clients.iter().find(|c| c.is_admin)
    }

    pub fn player(&self, client_id: ClientId, ctrl: ControlSlot) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| p.client_id == client_id && p.ctrl == ctrl)
    }

    pub fn player_mut(
        &mut self,
        client_id: ClientId,
        ctrl: ControlSlot,
    ) -> Option<&mut Player> {
        self.players
            .iter_mut()
            .find(|p| p.client_id == client_id && p.ctrl == ctrl)
    }

    /// Registers a client. The first client in an admin-less room becomes
    /// admin.
    pub fn add_client(&mut self, id: ClientId, name: String, conn: ConnectionId) -> &Client {
        let is_admin = self.admin().is_none();
        self.clients.push(Client {
            id,
            name,
            conn,
            is_admin,
            loading_stage: false,
            wants_lobby: false,
        });
        &self.clients[self.clients.len() - 1]
    }

    /// Removes the client on `conn` along with its players. If it was the
    /// admin, the earliest remaining client is promoted.
    pub fn remove_client(&mut self, conn: ConnectionId) -> Option<Departure> {
        let index = self.clients.iter().position(|c| c.conn == conn)?;
        let client = self.clients.remove(index);

        let before = self.players.len();
        self.players.retain(|p| p.client_id != client.id);
        let players_removed = before - self.players.len();

        let new_admin = if client.is_admin {
            self.clients.first_mut().map(|next| {
                next.is_admin = true;
                next.id
            })
        } else {
            None
        };

        Some(Departure {
            client,
            players_removed,
            new_admin,
        })
    }

    /// Adds a player unless that slot is already taken. Returns whether it
    /// was added.
    pub fn add_player(&mut self, player: Player) -> bool {
        if self.player(player.client_id, player.ctrl).is_some() {
            return false;
        }
        self.players.push(player);
        true
    }

    pub fn remove_player(
        &mut self,
        client_id: ClientId,
        ctrl: ControlSlot,
    ) -> Option<Player> {
        let index = self
            .players
            .iter()
            .position(|p| p.client_id == client_id && p.ctrl == ctrl)?;
        Some(self.players.remove(index))
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}
