//! Wire protocol for Broadside.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "payload": {...}}`. Event names are snake_case and
//! payload fields camelCase.

use serde::{Deserialize, Serialize};

use crate::board::{Orientation, Position, ShipKind, ShotOutcome};
use crate::error::BroadsideError;
use crate::game::FinishReason;
use crate::invitation::Decision;

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Register { username: String },
    GetOnlineUsers,
    Logout,
    SendInvitation { to_username: String },
    RespondInvitation { invite_id: String, response: Decision },
    JoinGame { game_id: String },
    PlaceShip { game_id: String, ship: ShipKind, origin: Position, orientation: Orientation },
    PlayerReady { game_id: String },
    GameMove { game_id: String, target: Position },
    GameOver { game_id: String, winner: String },
    Surrender { game_id: String },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct RegisterPayload {
    username: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendInvitationPayload {
    to_username: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondInvitationPayload {
    invite_id: String,
    response: Decision,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GamePayload {
    game_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceShipPayload {
    game_id: String,
    ship: ShipKind,
    x: u8,
    y: u8,
    orientation: Orientation,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameMovePayload {
    game_id: String,
    #[serde(rename = "move")]
    target: Position,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameOverPayload {
    game_id: String,
    winner: String,
}

fn payload<T: serde::de::DeserializeOwned>(event: &str, value: serde_json::Value) -> Result<T, BroadsideError> {
    serde_json::from_value(value)
        .map_err(|e| BroadsideError::protocol(format!("invalid {} payload: {}", event, e)))
}

impl ClientEvent {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, BroadsideError> {
        let Envelope { event, payload: body } = serde_json::from_str(text)
            .map_err(|e| BroadsideError::protocol(format!("malformed message: {}", e)))?;

        let decoded = match event.as_str() {
            "register" => {
                let p: RegisterPayload = payload(&event, body)?;
                ClientEvent::Register { username: p.username }
            }
            "get_online_users" => ClientEvent::GetOnlineUsers,
            "logout" => ClientEvent::Logout,
            "send_invitation" => {
                let p: SendInvitationPayload = payload(&event, body)?;
                ClientEvent::SendInvitation { to_username: p.to_username }
            }
            "respond_invitation" => {
                let p: RespondInvitationPayload = payload(&event, body)?;
                ClientEvent::RespondInvitation {
                    invite_id: p.invite_id,
                    response: p.response,
                }
            }
            "join_game" => {
                let p: GamePayload = payload(&event, body)?;
                ClientEvent::JoinGame { game_id: p.game_id }
            }
            "place_ship" => {
                let p: PlaceShipPayload = payload(&event, body)?;
                ClientEvent::PlaceShip {
                    game_id: p.game_id,
                    ship: p.ship,
                    origin: Position::new(p.x, p.y),
                    orientation: p.orientation,
                }
            }
            "player_ready" => {
                let p: GamePayload = payload(&event, body)?;
                ClientEvent::PlayerReady { game_id: p.game_id }
            }
            "game_move" => {
                let p: GameMovePayload = payload(&event, body)?;
                ClientEvent::GameMove {
                    game_id: p.game_id,
                    target: p.target,
                }
            }
            "game_over" => {
                let p: GameOverPayload = payload(&event, body)?;
                ClientEvent::GameOver {
                    game_id: p.game_id,
                    winner: p.winner,
                }
            }
            "surrender" => {
                let p: GamePayload = payload(&event, body)?;
                ClientEvent::Surrender { game_id: p.game_id }
            }
            other => return Err(BroadsideError::protocol(format!("unknown event: {}", other))),
        };

        Ok(decoded)
    }

    /// Event name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Register { .. } => "register",
            ClientEvent::GetOnlineUsers => "get_online_users",
            ClientEvent::Logout => "logout",
            ClientEvent::SendInvitation { .. } => "send_invitation",
            ClientEvent::RespondInvitation { .. } => "respond_invitation",
            ClientEvent::JoinGame { .. } => "join_game",
            ClientEvent::PlaceShip { .. } => "place_ship",
            ClientEvent::PlayerReady { .. } => "player_ready",
            ClientEvent::GameMove { .. } => "game_move",
            ClientEvent::GameOver { .. } => "game_over",
            ClientEvent::Surrender { .. } => "surrender",
        }
    }
}

/// Messages the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    RegisterSuccess {
        username: String,
    },
    RegisterError {
        message: String,
    },
    UsersUpdate {
        users: Vec<String>,
    },
    OnlineUsers {
        users: Vec<String>,
    },
    LogoutSuccess {
        message: String,
    },
    InvitationSent {
        to_user: String,
    },
    InvitationError {
        message: String,
    },
    InvitationReceived {
        invite_id: String,
        from_user: String,
        game_id: String,
    },
    InvitationDeclined {
        by_user: String,
    },
    InvitationExpired {
        invite_id: String,
        user: String,
    },
    GameStart {
        game_id: String,
        opponent: String,
        is_player1: bool,
    },
    JoinedGame {
        game_id: String,
    },
    ShipPlaced {
        ship: ShipKind,
        placed: bool,
    },
    GameReady {
        current_turn: String,
        player1: String,
        player2: String,
    },
    PlayerReadyUpdate {
        player1_ready: bool,
        player2_ready: bool,
    },
    MoveMade {
        #[serde(rename = "move")]
        target: Position,
        by_player: String,
        next_turn: Option<String>,
        result: ShotOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        ship: Option<ShipKind>,
    },
    GameFinished {
        winner: Option<String>,
        reason: FinishReason,
    },
    OpponentDisconnected {},
    GameError {
        message: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String, BroadsideError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_register() {
        let event = ClientEvent::decode(r#"{"event":"register","payload":{"username":"Alice"}}"#).unwrap();
        assert_eq!(event, ClientEvent::Register { username: "Alice".into() });
    }

    #[test]
    fn test_decode_without_payload() {
        assert_eq!(ClientEvent::decode(r#"{"event":"get_online_users"}"#).unwrap(), ClientEvent::GetOnlineUsers);
        assert_eq!(ClientEvent::decode(r#"{"event":"logout","payload":{}}"#).unwrap(), ClientEvent::Logout);
    }

    #[test]
    fn test_decode_move_ignores_extra_fields() {
        let text = r#"{"event":"game_move","payload":{"gameId":"game_1","move":{"x":3,"y":4,"timestamp":1}}}"#;
        let event = ClientEvent::decode(text).unwrap();
        assert_eq!(
            event,
            ClientEvent::GameMove {
                game_id: "game_1".into(),
                target: Position::new(3, 4),
            }
        );
    }

    #[test]
    fn test_decode_respond_and_place() {
        let text = r#"{"event":"respond_invitation","payload":{"inviteId":"invite_1","response":"accept"}}"#;
        assert_eq!(
            ClientEvent::decode(text).unwrap(),
            ClientEvent::RespondInvitation {
                invite_id: "invite_1".into(),
                response: Decision::Accept,
            }
        );

        let text = r#"{"event":"place_ship","payload":{"gameId":"g","ship":"patrolBoat","x":1,"y":2,"orientation":"vertical"}}"#;
        let event = ClientEvent::decode(text).unwrap();
        assert_eq!(event.name(), "place_ship");
    }

    #[test]
    fn test_decode_errors() {
        assert!(ClientEvent::decode("not json").is_err());
        assert!(ClientEvent::decode(r#"{"event":"fly_away"}"#).is_err());
        assert!(ClientEvent::decode(r#"{"event":"register","payload":{}}"#).is_err());
        assert!(ClientEvent::decode(r#"{"event":"game_move","payload":{"gameId":"g","move":{"x":-1,"y":0}}}"#).is_err());
        let err = ClientEvent::decode(r#"{"event":"respond_invitation","payload":{"inviteId":"i","response":"maybe"}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_encode_shapes() {
        let value: serde_json::Value = serde_json::from_str(
            &ServerEvent::GameStart {
                game_id: "game_1".into(),
                opponent: "bob".into(),
                is_player1: true,
            }
            .encode()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(
            value,
            json!({"event": "game_start", "payload": {"gameId": "game_1", "opponent": "bob", "isPlayer1": true}})
        );

        let value = serde_json::to_value(ServerEvent::OpponentDisconnected {}).unwrap();
        assert_eq!(value, json!({"event": "opponent_disconnected", "payload": {}}));
    }

    #[test]
    fn test_encode_move_made() {
        let value = serde_json::to_value(ServerEvent::MoveMade {
            target: Position::new(1, 2),
            by_player: "alice".into(),
            next_turn: Some("bob".into()),
            result: ShotOutcome::Hit,
            ship: None,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"event": "move_made", "payload": {
                "move": {"x": 1, "y": 2},
                "byPlayer": "alice",
                "nextTurn": "bob",
                "result": "hit"
            }})
        );

        let value = serde_json::to_value(ServerEvent::PlayerReadyUpdate {
            player1_ready: true,
            player2_ready: false,
        })
        .unwrap();
        assert_eq!(value["payload"], json!({"player1Ready": true, "player2Ready": false}));
    }
}
