// Copyright (C) 2026 Cluecraft
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::Utc;
use cluecraft_common::{
    BOARD_SIZE, Clue, CreateGameRequest, CreateGameResponse, EndTurnRequest, ErrorKind, GameAction,
    GameError, GameId, GameState, GameStatus, GameUpdate, GiveClueRequest, Guess, GuessOutcome,
    JoinGameRequest, JoinGameResponse, MAX_PLAYERS, MIN_PLAYERS_TO_START, MakeGuessRequest,
    MakeGuessResponse, Player, PlayerRole, SetRoleRequest, Spymasters, SwitchTeamRequest, Team,
    check_win_condition, default_word_bank, generate_board, generate_game_code,
    normalize_game_code, normalize_word_bank, should_end_turn, validate_clue, validate_guess,
};
use serde::Deserialize;
use tokio::sync::{RwLock, broadcast};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    store: Arc<RwLock<GameStore>>,
    updates_tx: broadcast::Sender<GameUpdate>,
}

struct GameStore {
    word_bank: Vec<String>,
    games: HashMap<GameId, GameState>,
}

impl Default for GameStore {
    fn default() -> Self {
        Self {
            word_bank: default_word_bank(),
            games: HashMap::new(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "game_service=debug,tower_http=info".to_string()),
        )
        .init();

    let mut store = GameStore::default();
    if let Some(bank) = load_word_bank_config() {
        info!(words = bank.len(), "loaded word bank from YAML config");
        store.word_bank = bank;
    }

    let (updates_tx, _) = broadcast::channel(512);
    let state = AppState {
        store: Arc::new(RwLock::new(store)),
        updates_tx,
    };

    let app = build_router(state);

    let bind_addr = parse_bind_addr("GAME_SERVICE_BIND", "0.0.0.0:8080")?;
    info!(%bind_addr, "game-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct WordBankConfig {
    words: Vec<String>,
}

/// Optional YAML override for the board vocabulary. Any problem with the
/// file logs a warning and keeps the built-in bank.
fn load_word_bank_config() -> Option<Vec<String>> {
    let path = std::env::var("WORD_BANK_CONFIG_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read word bank config file");
            return None;
        }
    };

    if raw.trim().is_empty() {
        warn!(path = %path, "word bank config file is empty");
        return None;
    }

    let config = match serde_yaml::from_str::<WordBankConfig>(&raw) {
        Ok(config) => config,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to parse word bank config yaml");
            return None;
        }
    };

    let bank = normalize_word_bank(config.words);
    if bank.len() < BOARD_SIZE {
        warn!(
            path = %path,
            words = bank.len(),
            minimum = BOARD_SIZE,
            "word bank config has too few distinct words"
        );
        return None;
    }

    Some(bank)
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/games", post(create_game_handler))
        .route("/v1/games/{game_id}", get(get_game_handler))
        .route("/v1/games/{game_id}/join", post(join_game_handler))
        .route("/v1/games/{game_id}/team", put(switch_team_handler))
        .route("/v1/games/{game_id}/role", put(set_role_handler))
        .route("/v1/games/{game_id}/start", post(start_game_handler))
        .route("/v1/games/{game_id}/clue", post(give_clue_handler))
        .route("/v1/games/{game_id}/guess", post(make_guess_handler))
        .route("/v1/games/{game_id}/end-turn", post(end_turn_handler))
        .route("/v1/games/{game_id}/stream", get(stream_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "game-service"}))
}

fn lookup_game<'a>(store: &'a GameStore, game_id: &str) -> Result<&'a GameState, GameError> {
    let code = normalize_game_code(game_id).ok_or(GameError::GameNotFound)?;
    store.games.get(&code).ok_or(GameError::GameNotFound)
}

fn lookup_game_mut<'a>(
    store: &'a mut GameStore,
    game_id: &str,
) -> Result<&'a mut GameState, GameError> {
    let code = normalize_game_code(game_id).ok_or(GameError::GameNotFound)?;
    store.games.get_mut(&code).ok_or(GameError::GameNotFound)
}

/// Fresh code not already in use. Regenerates on collision.
fn mint_game_code(store: &GameStore) -> GameId {
    loop {
        let code = generate_game_code();
        if !store.games.contains_key(&code) {
            return code;
        }
    }
}

fn switch_turn(game: &mut GameState) {
    game.current_team = game.current_team.opponent();
}

fn broadcast_update(
    updates_tx: &broadcast::Sender<GameUpdate>,
    action: GameAction,
    game: &GameState,
    guess: Option<GuessOutcome>,
) {
    let update = GameUpdate {
        game_id: game.game_id.clone(),
        action,
        game: game.clone(),
        guess,
        emitted_at: Utc::now(),
    };

    if updates_tx.receiver_count() > 0
        && let Err(error) = updates_tx.send(update)
    {
        warn!(?error, "failed to fan out game update to stream subscribers");
    }
}

async fn create_game_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateGameRequest>,
) -> Result<Json<CreateGameResponse>, ApiError> {
    let mut store = state.store.write().await;

    let game_id = mint_game_code(&store);
    let creator = Player::new(request.player_name);
    let player_id = creator.id.clone();

    let game = GameState {
        game_id: game_id.clone(),
        words: Vec::new(),
        word_types: Vec::new(),
        current_team: Team::Red,
        spymasters: Spymasters::default(),
        players: HashMap::from([(player_id.clone(), creator)]),
        clues: Vec::new(),
        guesses: Vec::new(),
        game_status: GameStatus::Waiting,
        winner: None,
        created_at: Utc::now(),
        started_at: None,
    };

    store.games.insert(game_id.clone(), game.clone());
    info!(game_id = %game_id, player_id = %player_id, "created game");
    broadcast_update(&state.updates_tx, GameAction::GameCreated, &game, None);

    Ok(Json(CreateGameResponse {
        game_id,
        player_id,
        game,
    }))
}

async fn join_game_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(request): Json<JoinGameRequest>,
) -> Result<Json<JoinGameResponse>, ApiError> {
    let mut store = state.store.write().await;
    let game = lookup_game_mut(&mut store, &game_id)?;

    if game.game_status != GameStatus::Waiting {
        return Err(GameError::CannotJoinStartedGame.into());
    }
    if game.players.len() >= MAX_PLAYERS {
        return Err(GameError::GameFull.into());
    }

    let player = Player::new(request.player_name);
    let player_id = player.id.clone();
    game.players.insert(player_id.clone(), player);

    info!(game_id = %game.game_id, player_id = %player_id, "player joined game");
    let game = game.clone();
    broadcast_update(&state.updates_tx, GameAction::PlayerJoined, &game, None);

    Ok(Json(JoinGameResponse { player_id, game }))
}

async fn switch_team_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(request): Json<SwitchTeamRequest>,
) -> Result<Json<GameState>, ApiError> {
    let mut store = state.store.write().await;
    let game = lookup_game_mut(&mut store, &game_id)?;

    if game.game_status != GameStatus::Waiting {
        return Err(GameError::GameAlreadyStarted.into());
    }

    let (old_team, held_spymaster_role) = {
        let player = game
            .players
            .get_mut(&request.player_id)
            .ok_or(GameError::PlayerNotFound)?;
        let old_team = player.team;
        player.team = request.team;
        (old_team, player.role == PlayerRole::Spymaster)
    };

    // A spymaster changing sides leaves the seat behind; the new team's
    // seat is never auto-claimed.
    if held_spymaster_role && game.spymasters.holder(old_team) == Some(&request.player_id) {
        game.spymasters.set_holder(old_team, None);
    }

    info!(
        game_id = %game.game_id,
        player_id = %request.player_id,
        team = %request.team,
        "player switched team"
    );
    let game = game.clone();
    broadcast_update(&state.updates_tx, GameAction::TeamSwitched, &game, None);

    Ok(Json(game))
}

async fn set_role_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(request): Json<SetRoleRequest>,
) -> Result<Json<GameState>, ApiError> {
    let mut store = state.store.write().await;
    let game = lookup_game_mut(&mut store, &game_id)?;

    if game.game_status != GameStatus::Waiting {
        return Err(GameError::GameAlreadyStarted.into());
    }

    let (team, old_role) = {
        let player = game
            .players
            .get(&request.player_id)
            .ok_or(GameError::PlayerNotFound)?;
        (player.team, player.role)
    };

    // Claiming a seat only fails when a different player holds it, so
    // re-asserting your own seat is a no-op success.
    if request.role == PlayerRole::Spymaster
        && let Some(holder) = game.spymasters.holder(team)
        && holder != &request.player_id
    {
        return Err(GameError::SpymasterSeatTaken { team }.into());
    }

    if old_role == PlayerRole::Spymaster
        && request.role != PlayerRole::Spymaster
        && game.spymasters.holder(team) == Some(&request.player_id)
    {
        game.spymasters.set_holder(team, None);
    }

    let player = game
        .players
        .get_mut(&request.player_id)
        .ok_or(GameError::PlayerNotFound)?;
    player.role = request.role;

    if request.role == PlayerRole::Spymaster {
        game.spymasters
            .set_holder(team, Some(request.player_id.clone()));
    }

    info!(
        game_id = %game.game_id,
        player_id = %request.player_id,
        role = ?request.role,
        "player role changed"
    );
    let game = game.clone();
    broadcast_update(&state.updates_tx, GameAction::RoleChanged, &game, None);

    Ok(Json(game))
}

async fn start_game_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
) -> Result<Json<GameState>, ApiError> {
    let mut store = state.store.write().await;

    {
        let game = lookup_game(&store, &game_id)?;
        if game.game_status != GameStatus::Waiting {
            return Err(GameError::GameAlreadyStarted.into());
        }
        if game.players.len() < MIN_PLAYERS_TO_START {
            return Err(GameError::NotEnoughPlayers.into());
        }
        if game.team_players(Team::Red).next().is_none()
            || game.team_players(Team::Blue).next().is_none()
        {
            return Err(GameError::TeamMissingPlayers.into());
        }
        if game.spymasters.red.is_none() || game.spymasters.blue.is_none() {
            return Err(GameError::TeamMissingSpymaster.into());
        }
    }

    let board = generate_board(&store.word_bank);
    let game = lookup_game_mut(&mut store, &game_id)?;
    game.words = board.words;
    game.word_types = board.word_types;
    game.game_status = GameStatus::InProgress;
    game.current_team = board.starting_team;
    game.started_at = Some(Utc::now());

    info!(
        game_id = %game.game_id,
        starting_team = %game.current_team,
        "game started"
    );
    let game = game.clone();
    broadcast_update(&state.updates_tx, GameAction::GameStarted, &game, None);

    Ok(Json(game))
}

async fn give_clue_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(request): Json<GiveClueRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut store = state.store.write().await;
    let game = lookup_game_mut(&mut store, &game_id)?;

    validate_clue(game, &request.player_id, &request.word, request.number)?;

    let clue = Clue {
        spymaster: request.player_id.clone(),
        team: game.current_team,
        word: request.word.trim().to_string(),
        number: request.number as u8,
        seq: game.next_seq(),
        created_at: Utc::now(),
    };
    info!(
        game_id = %game.game_id,
        player_id = %request.player_id,
        clue_word = %clue.word,
        clue_number = clue.number,
        "clue given"
    );
    game.clues.push(clue);

    let game = game.clone();
    broadcast_update(&state.updates_tx, GameAction::ClueGiven, &game, None);

    Ok(Json(serde_json::json!({"ok": true})))
}

async fn make_guess_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(request): Json<MakeGuessRequest>,
) -> Result<Json<MakeGuessResponse>, ApiError> {
    let mut store = state.store.write().await;
    let game = lookup_game_mut(&mut store, &game_id)?;

    validate_guess(game, &request.player_id, request.word_index)?;

    let word_index = request.word_index as usize;
    let word_type = game
        .word_types
        .get(word_index)
        .copied()
        .ok_or_else(|| ApiError::internal("guessed cell missing from board"))?;
    let correct = word_type.team() == Some(game.current_team);

    let guess = Guess {
        player: request.player_id.clone(),
        word_index,
        correct,
        seq: game.next_seq(),
        created_at: Utc::now(),
    };
    game.guesses.push(guess);

    let should_end_turn = should_end_turn(game, word_index);
    if should_end_turn {
        switch_turn(game);
    }

    // The win check runs after any turn flip, whether or not the turn ended.
    let winner = check_win_condition(game);
    if let Some(team) = winner {
        game.winner = Some(team);
        game.game_status = GameStatus::Completed;
        info!(game_id = %game.game_id, winner = %team, "game completed");
    }

    info!(
        game_id = %game.game_id,
        player_id = %request.player_id,
        word_index,
        correct,
        should_end_turn,
        "guess made"
    );

    let game = game.clone();
    let outcome = GuessOutcome {
        player_id: request.player_id.clone(),
        word_index,
        correct,
        should_end_turn,
        winner,
    };
    broadcast_update(&state.updates_tx, GameAction::GuessMade, &game, Some(outcome));

    Ok(Json(MakeGuessResponse {
        correct,
        should_end_turn,
        winner,
        game,
    }))
}

async fn end_turn_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    Json(request): Json<EndTurnRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut store = state.store.write().await;
    let game = lookup_game_mut(&mut store, &game_id)?;

    let player = game
        .players
        .get(&request.player_id)
        .ok_or(GameError::PlayerNotFound)?;
    if player.team != game.current_team {
        return Err(GameError::WrongTurn.into());
    }
    if game.game_status != GameStatus::InProgress {
        return Err(GameError::GameNotInProgress.into());
    }

    switch_turn(game);
    info!(
        game_id = %game.game_id,
        player_id = %request.player_id,
        now_on_turn = %game.current_team,
        "turn passed"
    );

    let game = game.clone();
    broadcast_update(&state.updates_tx, GameAction::TurnEnded, &game, None);

    Ok(Json(serde_json::json!({"ok": true})))
}

async fn get_game_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
) -> Result<Json<GameState>, ApiError> {
    let store = state.store.read().await;
    let game = lookup_game(&store, &game_id)?;
    Ok(Json(game.clone()))
}

async fn stream_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Path(game_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, game_id))
}

/// Subscribes to the update feed before reading the snapshot, so an
/// update broadcast between the two is queued on the subscription
/// rather than lost. Yields no snapshot for unknown or malformed codes.
async fn open_game_stream(
    state: &AppState,
    raw_game_id: &str,
) -> (broadcast::Receiver<GameUpdate>, Option<GameState>) {
    let updates_rx = state.updates_tx.subscribe();
    let store = state.store.read().await;
    let snapshot = lookup_game(&store, raw_game_id).ok().cloned();
    (updates_rx, snapshot)
}

async fn handle_socket(
    mut socket: axum::extract::ws::WebSocket,
    state: AppState,
    raw_game_id: String,
) {
    let (mut updates_rx, snapshot) = open_game_stream(&state, &raw_game_id).await;

    let Some(snapshot) = snapshot else {
        let payload = serde_json::json!({
            "event_type": "ERROR",
            "game_id": raw_game_id,
            "error": GameError::GameNotFound.to_string(),
            "code": GameError::GameNotFound.code(),
            "at": Utc::now(),
        })
        .to_string();
        let _ = send_ws_event(&mut socket, &raw_game_id, "ERROR", payload, None).await;
        return;
    };
    let game_id = snapshot.game_id.clone();

    let connected = serde_json::json!({
        "event_type": "CONNECTED",
        "game_id": game_id,
        "connected_at": Utc::now(),
        "message": "game stream connected"
    })
    .to_string();
    if send_ws_event(&mut socket, &game_id, "CONNECTED", connected, None)
        .await
        .is_err()
    {
        return;
    }

    let initial = serde_json::json!({
        "event_type": "SNAPSHOT",
        "game_id": game_id,
        "game": &snapshot,
        "emitted_at": Utc::now(),
    })
    .to_string();
    if send_ws_event(&mut socket, &game_id, "SNAPSHOT", initial, Some(&snapshot))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            update = updates_rx.recv() => {
                match update {
                    Ok(update) => {
                        let Some(payload) = stream_update_payload(&update, &game_id) else {
                            continue;
                        };

                        if send_ws_event(
                            &mut socket,
                            &game_id,
                            "GAME_UPDATED",
                            payload.to_string(),
                            Some(&update.game),
                        )
                        .await
                        .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(game_id = %game_id, skipped, "game stream lagged behind updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            message = socket.recv() => {
                // Inbound frames are ignored; a close or error ends the stream.
                match message {
                    Some(Ok(_)) => continue,
                    _ => break,
                }
            }
        }
    }
}

/// Payload for one broadcast update on a game stream, or None when the
/// update belongs to a different game.
fn stream_update_payload(update: &GameUpdate, game_id: &str) -> Option<serde_json::Value> {
    if update.game_id != game_id {
        return None;
    }

    Some(serde_json::json!({
        "event_type": "GAME_UPDATED",
        "game_id": update.game_id.as_str(),
        "action": update.action,
        "game": &update.game,
        "guess": &update.guess,
        "emitted_at": update.emitted_at,
    }))
}

fn log_stream_push(event_type: &str, game_id: &str, payload: &str, game: Option<&GameState>) {
    if let Some(game) = game {
        info!(
            event_type = event_type,
            game_id = game_id,
            game_status = ?game.game_status,
            current_team = %game.current_team,
            websocket_payload = %payload,
            "pushing game stream event"
        );
        return;
    }

    info!(
        event_type = event_type,
        game_id = game_id,
        websocket_payload = %payload,
        "pushing game stream event"
    );
}

async fn send_ws_event(
    socket: &mut axum::extract::ws::WebSocket,
    game_id: &str,
    event_type: &str,
    payload: String,
    game: Option<&GameState>,
) -> Result<(), ()> {
    log_stream_push(event_type, game_id, &payload, game);
    socket
        .send(axum::extract::ws::Message::Text(payload.into()))
        .await
        .map_err(|error| {
            warn!(
                event_type = event_type,
                game_id = game_id,
                error = ?error,
                "failed to push game stream event"
            );
        })
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL",
            message: message.into(),
        }
    }
}

impl From<GameError> for ApiError {
    fn from(error: GameError) -> Self {
        let status = match error.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Precondition | ErrorKind::TurnViolation | ErrorKind::InputViolation => {
                StatusCode::BAD_REQUEST
            }
        };
        Self {
            status,
            code: error.code(),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, code = self.code, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message, "code": self.code})),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluecraft_common::{PlayerId, WordType};

    fn app_state() -> AppState {
        let (updates_tx, _) = broadcast::channel(64);
        AppState {
            store: Arc::new(RwLock::new(GameStore::default())),
            updates_tx,
        }
    }

    async fn create_game(state: &AppState, player_name: &str) -> CreateGameResponse {
        create_game_handler(
            State(state.clone()),
            Json(CreateGameRequest {
                player_name: player_name.to_string(),
            }),
        )
        .await
        .unwrap()
        .0
    }

    async fn join_game(state: &AppState, game_id: &str, player_name: &str) -> JoinGameResponse {
        join_game_handler(
            State(state.clone()),
            Path(game_id.to_string()),
            Json(JoinGameRequest {
                player_name: player_name.to_string(),
            }),
        )
        .await
        .unwrap()
        .0
    }

    async fn switch_team(state: &AppState, game_id: &str, player_id: &str, team: Team) {
        let _ = switch_team_handler(
            State(state.clone()),
            Path(game_id.to_string()),
            Json(SwitchTeamRequest {
                player_id: player_id.to_string(),
                team,
            }),
        )
        .await
        .unwrap();
    }

    async fn set_role(state: &AppState, game_id: &str, player_id: &str, role: PlayerRole) {
        let _ = set_role_handler(
            State(state.clone()),
            Path(game_id.to_string()),
            Json(SetRoleRequest {
                player_id: player_id.to_string(),
                role,
            }),
        )
        .await
        .unwrap();
    }

    async fn give_clue(
        state: &AppState,
        game_id: &str,
        player_id: &str,
        word: &str,
        number: i64,
    ) -> Result<Json<serde_json::Value>, ApiError> {
        give_clue_handler(
            State(state.clone()),
            Path(game_id.to_string()),
            Json(GiveClueRequest {
                player_id: player_id.to_string(),
                word: word.to_string(),
                number,
            }),
        )
        .await
    }

    async fn make_guess(
        state: &AppState,
        game_id: &str,
        player_id: &str,
        word_index: i64,
    ) -> Result<MakeGuessResponse, ApiError> {
        make_guess_handler(
            State(state.clone()),
            Path(game_id.to_string()),
            Json(MakeGuessRequest {
                player_id: player_id.to_string(),
                word_index,
            }),
        )
        .await
        .map(|response| response.0)
    }

    async fn get_game(state: &AppState, game_id: &str) -> GameState {
        get_game_handler(State(state.clone()), Path(game_id.to_string()))
            .await
            .unwrap()
            .0
    }

    struct Party {
        game_id: String,
        red_spy: PlayerId,
        red_op: PlayerId,
        blue_spy: PlayerId,
        blue_op: PlayerId,
    }

    /// Four players across two teams, seats claimed, game started.
    async fn started_party(state: &AppState) -> Party {
        let created = create_game(state, "Rhea").await;
        let game_id = created.game_id.clone();
        let red_spy = created.player_id.clone();

        let red_op = join_game(state, &game_id, "Riley").await.player_id;
        let blue_spy = join_game(state, &game_id, "Blake").await.player_id;
        let blue_op = join_game(state, &game_id, "Bella").await.player_id;

        switch_team(state, &game_id, &blue_spy, Team::Blue).await;
        switch_team(state, &game_id, &blue_op, Team::Blue).await;
        set_role(state, &game_id, &red_spy, PlayerRole::Spymaster).await;
        set_role(state, &game_id, &blue_spy, PlayerRole::Spymaster).await;

        let _ = start_game_handler(State(state.clone()), Path(game_id.clone()))
            .await
            .unwrap();

        Party {
            game_id,
            red_spy,
            red_op,
            blue_spy,
            blue_op,
        }
    }

    /// Overwrite the dealt board with a fixed layout: red agents at 0-8,
    /// blue at 9-16, neutrals at 17-23, assassin at 24.
    async fn rig_board(state: &AppState, game_id: &str, on_turn: Team) {
        let mut store = state.store.write().await;
        let game = store.games.get_mut(game_id).unwrap();
        game.words = (0..BOARD_SIZE).map(|i| format!("CELL{i:02}")).collect();

        let mut word_types = Vec::with_capacity(BOARD_SIZE);
        word_types.extend(std::iter::repeat_n(WordType::Red, 9));
        word_types.extend(std::iter::repeat_n(WordType::Blue, 8));
        word_types.extend(std::iter::repeat_n(WordType::Neutral, 7));
        word_types.push(WordType::Assassin);
        game.word_types = word_types;
        game.current_team = on_turn;
    }

    #[tokio::test]
    async fn health_reports_service_name() {
        let payload = health().await.0;
        assert_eq!(payload["ok"], true);
        assert_eq!(payload["service"], "game-service");
    }

    #[tokio::test]
    async fn create_game_registers_creator_as_red_operative() {
        let state = app_state();
        let created = create_game(&state, "Rhea").await;

        assert_eq!(
            normalize_game_code(&created.game_id),
            Some(created.game_id.clone())
        );
        assert_eq!(created.game.game_status, GameStatus::Waiting);
        assert_eq!(created.game.current_team, Team::Red);
        assert!(created.game.words.is_empty());
        assert!(created.game.started_at.is_none());

        let creator = &created.game.players[&created.player_id];
        assert_eq!(creator.name, "Rhea");
        assert_eq!(creator.team, Team::Red);
        assert_eq!(creator.role, PlayerRole::Operative);
    }

    #[tokio::test]
    async fn game_lookup_is_case_insensitive() {
        let state = app_state();
        let created = create_game(&state, "Rhea").await;

        let fetched = get_game(&state, &created.game_id.to_lowercase()).await;
        assert_eq!(fetched.game_id, created.game_id);
    }

    #[tokio::test]
    async fn unknown_or_malformed_game_codes_return_not_found() {
        let state = app_state();

        let err = get_game_handler(State(state.clone()), Path("ZZZZZ9".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "GAME_NOT_FOUND");

        let err = get_game_handler(State(state), Path("not-a-code".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn join_game_caps_players_at_eight() {
        let state = app_state();
        let created = create_game(&state, "Rhea").await;

        for i in 1..MAX_PLAYERS {
            join_game(&state, &created.game_id, &format!("Player{i}")).await;
        }

        let err = join_game_handler(
            State(state.clone()),
            Path(created.game_id.clone()),
            Json(JoinGameRequest {
                player_name: "Late".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "GAME_FULL");

        let game = get_game(&state, &created.game_id).await;
        assert_eq!(game.players.len(), MAX_PLAYERS);
    }

    #[tokio::test]
    async fn join_after_start_is_rejected() {
        let state = app_state();
        let party = started_party(&state).await;

        let err = join_game_handler(
            State(state.clone()),
            Path(party.game_id.clone()),
            Json(JoinGameRequest {
                player_name: "Late".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "CANNOT_JOIN_STARTED_GAME");
    }

    #[tokio::test]
    async fn switch_team_vacates_spymaster_seat_without_claiming_new_one() {
        let state = app_state();
        let created = create_game(&state, "Rhea").await;
        let player_id = created.player_id.clone();
        set_role(&state, &created.game_id, &player_id, PlayerRole::Spymaster).await;

        switch_team(&state, &created.game_id, &player_id, Team::Blue).await;

        let game = get_game(&state, &created.game_id).await;
        assert_eq!(game.spymasters.red, None);
        assert_eq!(game.spymasters.blue, None);
        assert_eq!(game.players[&player_id].team, Team::Blue);
        // Role survives the move; only the seat is given up.
        assert_eq!(game.players[&player_id].role, PlayerRole::Spymaster);
    }

    #[tokio::test]
    async fn spymaster_seat_rejects_a_second_claimant() {
        let state = app_state();
        let created = create_game(&state, "Rhea").await;
        let first = created.player_id.clone();
        let second = join_game(&state, &created.game_id, "Riley").await.player_id;

        set_role(&state, &created.game_id, &first, PlayerRole::Spymaster).await;

        let err = set_role_handler(
            State(state.clone()),
            Path(created.game_id.clone()),
            Json(SetRoleRequest {
                player_id: second.clone(),
                role: PlayerRole::Spymaster,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "SPYMASTER_SEAT_TAKEN");

        // Re-asserting your own seat is fine.
        set_role(&state, &created.game_id, &first, PlayerRole::Spymaster).await;

        let game = get_game(&state, &created.game_id).await;
        assert_eq!(game.spymasters.red, Some(first));
        assert_eq!(game.players[&second].role, PlayerRole::Operative);
    }

    #[tokio::test]
    async fn seat_follows_players_through_team_and_role_changes() {
        let state = app_state();
        let created = create_game(&state, "Rhea").await;
        let first = created.player_id.clone();
        let second = join_game(&state, &created.game_id, "Riley").await.player_id;

        set_role(&state, &created.game_id, &first, PlayerRole::Spymaster).await;
        switch_team(&state, &created.game_id, &first, Team::Blue).await;
        set_role(&state, &created.game_id, &first, PlayerRole::Spymaster).await;
        set_role(&state, &created.game_id, &second, PlayerRole::Spymaster).await;

        let game = get_game(&state, &created.game_id).await;
        assert_eq!(game.spymasters.blue, Some(first));
        assert_eq!(game.spymasters.red, Some(second));
    }

    #[tokio::test]
    async fn start_game_walks_the_precondition_ladder() {
        let state = app_state();
        let created = create_game(&state, "Rhea").await;
        let game_id = created.game_id.clone();

        let err = start_game_handler(State(state.clone()), Path(game_id.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.code, "NOT_ENOUGH_PLAYERS");

        join_game(&state, &game_id, "Riley").await;
        let third = join_game(&state, &game_id, "Blake").await.player_id;
        let fourth = join_game(&state, &game_id, "Bella").await.player_id;

        // All four default to red.
        let err = start_game_handler(State(state.clone()), Path(game_id.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.code, "TEAM_MISSING_PLAYERS");

        switch_team(&state, &game_id, &third, Team::Blue).await;
        switch_team(&state, &game_id, &fourth, Team::Blue).await;

        let err = start_game_handler(State(state.clone()), Path(game_id.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.code, "TEAM_MISSING_SPYMASTER");

        set_role(&state, &game_id, &created.player_id, PlayerRole::Spymaster).await;
        set_role(&state, &game_id, &third, PlayerRole::Spymaster).await;

        let started = start_game_handler(State(state.clone()), Path(game_id.clone()))
            .await
            .unwrap()
            .0;
        assert_eq!(started.game_status, GameStatus::InProgress);
        assert_eq!(started.words.len(), BOARD_SIZE);
        assert!(started.started_at.is_some());

        let starting_agents = started
            .word_types
            .iter()
            .filter(|word_type| **word_type == WordType::from(started.current_team))
            .count();
        assert_eq!(starting_agents, 9);
    }

    #[tokio::test]
    async fn lobby_commands_are_rejected_after_start() {
        let state = app_state();
        let party = started_party(&state).await;

        let err = switch_team_handler(
            State(state.clone()),
            Path(party.game_id.clone()),
            Json(SwitchTeamRequest {
                player_id: party.red_op.clone(),
                team: Team::Blue,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "GAME_ALREADY_STARTED");

        let err = set_role_handler(
            State(state.clone()),
            Path(party.game_id.clone()),
            Json(SetRoleRequest {
                player_id: party.red_op.clone(),
                role: PlayerRole::Spymaster,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "GAME_ALREADY_STARTED");

        let err = start_game_handler(State(state.clone()), Path(party.game_id.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.code, "GAME_ALREADY_STARTED");
    }

    #[tokio::test]
    async fn correct_guess_keeps_turn_and_neutral_hands_it_over() {
        let state = app_state();
        let party = started_party(&state).await;
        rig_board(&state, &party.game_id, Team::Red).await;

        let _ = give_clue(&state, &party.game_id, &party.red_spy, "FRUIT", 2)
            .await
            .unwrap();

        let first = make_guess(&state, &party.game_id, &party.red_op, 0)
            .await
            .unwrap();
        assert!(first.correct);
        assert!(!first.should_end_turn);
        assert_eq!(first.winner, None);
        assert_eq!(first.game.current_team, Team::Red);

        let second = make_guess(&state, &party.game_id, &party.red_op, 17)
            .await
            .unwrap();
        assert!(!second.correct);
        assert!(second.should_end_turn);
        assert_eq!(second.game.current_team, Team::Blue);
        assert_eq!(second.game.game_status, GameStatus::InProgress);
    }

    #[tokio::test]
    async fn guess_budget_is_declared_count_plus_one_bonus() {
        let state = app_state();
        let party = started_party(&state).await;
        rig_board(&state, &party.game_id, Team::Red).await;

        let err = make_guess(&state, &party.game_id, &party.red_op, 0)
            .await
            .unwrap_err();
        assert_eq!(err.code, "NO_CLUE_YET");

        let _ = give_clue(&state, &party.game_id, &party.red_spy, "FRUIT", 1)
            .await
            .unwrap();

        make_guess(&state, &party.game_id, &party.red_op, 0)
            .await
            .unwrap();
        make_guess(&state, &party.game_id, &party.red_op, 1)
            .await
            .unwrap();

        let err = make_guess(&state, &party.game_id, &party.red_op, 2)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "GUESS_LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn assassin_guess_completes_the_game_for_the_other_team() {
        let state = app_state();
        let party = started_party(&state).await;
        rig_board(&state, &party.game_id, Team::Red).await;

        let _ = give_clue(&state, &party.game_id, &party.red_spy, "FRUIT", 1)
            .await
            .unwrap();
        let fatal = make_guess(&state, &party.game_id, &party.red_op, 24)
            .await
            .unwrap();
        assert!(!fatal.correct);
        assert!(fatal.should_end_turn);
        assert_eq!(fatal.winner, Some(Team::Blue));
        assert_eq!(fatal.game.game_status, GameStatus::Completed);
        assert_eq!(fatal.game.winner, Some(Team::Blue));

        // Nothing moves once the game is decided.
        let err = give_clue(&state, &party.game_id, &party.blue_spy, "OCEAN", 1)
            .await
            .unwrap_err();
        assert_eq!(err.code, "GAME_NOT_IN_PROGRESS");

        let err = end_turn_handler(
            State(state.clone()),
            Path(party.game_id.clone()),
            Json(EndTurnRequest {
                player_id: party.blue_op.clone(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "GAME_NOT_IN_PROGRESS");
    }

    #[tokio::test]
    async fn revealing_every_red_agent_wins_for_red() {
        let state = app_state();
        let party = started_party(&state).await;
        rig_board(&state, &party.game_id, Team::Red).await;

        let _ = give_clue(&state, &party.game_id, &party.red_spy, "SWEEP", 9)
            .await
            .unwrap();

        for index in 0..8 {
            let response = make_guess(&state, &party.game_id, &party.red_op, index)
                .await
                .unwrap();
            assert_eq!(response.winner, None);
        }

        let last = make_guess(&state, &party.game_id, &party.red_op, 8)
            .await
            .unwrap();
        assert!(last.correct);
        assert_eq!(last.winner, Some(Team::Red));
        assert_eq!(last.game.game_status, GameStatus::Completed);
    }

    #[tokio::test]
    async fn end_turn_flips_without_a_guess() {
        let state = app_state();
        let party = started_party(&state).await;
        rig_board(&state, &party.game_id, Team::Red).await;

        let _ = end_turn_handler(
            State(state.clone()),
            Path(party.game_id.clone()),
            Json(EndTurnRequest {
                player_id: party.red_op.clone(),
            }),
        )
        .await
        .unwrap();

        let game = get_game(&state, &party.game_id).await;
        assert_eq!(game.current_team, Team::Blue);

        let err = end_turn_handler(
            State(state.clone()),
            Path(party.game_id.clone()),
            Json(EndTurnRequest {
                player_id: party.red_op.clone(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "WRONG_TURN");
    }

    #[tokio::test]
    async fn clue_rejections_surface_reason_codes() {
        let state = app_state();
        let party = started_party(&state).await;
        rig_board(&state, &party.game_id, Team::Red).await;

        let err = give_clue(&state, &party.game_id, &party.red_op, "FRUIT", 1)
            .await
            .unwrap_err();
        assert_eq!(err.code, "NOT_SPYMASTER");

        let err = give_clue(&state, &party.game_id, &party.blue_spy, "FRUIT", 1)
            .await
            .unwrap_err();
        assert_eq!(err.code, "WRONG_TURN");

        let err = give_clue(&state, &party.game_id, &party.red_spy, "CELL00", 1)
            .await
            .unwrap_err();
        assert_eq!(err.code, "RELATED_TO_BOARD_WORD");

        let err = make_guess(&state, &party.game_id, &party.red_spy, 0)
            .await
            .unwrap_err();
        assert_eq!(err.code, "NOT_OPERATIVE");
    }

    #[tokio::test]
    async fn updates_are_broadcast_to_subscribers() {
        let state = app_state();
        let mut updates_rx = state.updates_tx.subscribe();

        let created = create_game(&state, "Rhea").await;
        let update = updates_rx.try_recv().unwrap();
        assert_eq!(update.action, GameAction::GameCreated);
        assert_eq!(update.game_id, created.game_id);
        assert!(update.guess.is_none());

        join_game(&state, &created.game_id, "Riley").await;
        let update = updates_rx.try_recv().unwrap();
        assert_eq!(update.action, GameAction::PlayerJoined);
        assert_eq!(update.game.players.len(), 2);
    }

    #[tokio::test]
    async fn guess_updates_carry_the_outcome() {
        let state = app_state();
        let party = started_party(&state).await;
        rig_board(&state, &party.game_id, Team::Red).await;

        let mut updates_rx = state.updates_tx.subscribe();
        let _ = give_clue(&state, &party.game_id, &party.red_spy, "FRUIT", 1)
            .await
            .unwrap();
        let _ = updates_rx.try_recv().unwrap();

        make_guess(&state, &party.game_id, &party.red_op, 0)
            .await
            .unwrap();
        let update = updates_rx.try_recv().unwrap();
        assert_eq!(update.action, GameAction::GuessMade);
        let outcome = update.guess.expect("guess update carries an outcome");
        assert_eq!(outcome.word_index, 0);
        assert!(outcome.correct);
        assert!(!outcome.should_end_turn);
        assert_eq!(outcome.winner, None);
    }

    #[tokio::test]
    async fn updates_sent_while_a_stream_opens_are_not_lost() {
        let state = app_state();
        let created = create_game(&state, "Rhea").await;

        // Open the stream while a write to the store is in flight, so the
        // snapshot read inside has to wait.
        let mut store = state.store.write().await;
        let opening = tokio::spawn({
            let state = state.clone();
            let game_id = created.game_id.clone();
            async move { open_game_stream(&state, &game_id).await }
        });
        tokio::task::yield_now().await;

        let joiner = Player::new("Riley");
        let joiner_id = joiner.id.clone();
        let game = store.games.get_mut(&created.game_id).unwrap();
        game.players.insert(joiner_id.clone(), joiner);
        let game = game.clone();
        broadcast_update(&state.updates_tx, GameAction::PlayerJoined, &game, None);
        drop(store);

        let (mut updates_rx, snapshot) = opening.await.unwrap();
        assert_eq!(snapshot.unwrap().players.len(), 2);

        // Queued on the subscription even though the snapshot already has it.
        let update = updates_rx.try_recv().unwrap();
        assert_eq!(update.action, GameAction::PlayerJoined);
        assert!(update.game.players.contains_key(&joiner_id));
    }

    #[tokio::test]
    async fn stream_open_finds_no_game_for_unknown_or_malformed_codes() {
        let state = app_state();

        let (_updates_rx, snapshot) = open_game_stream(&state, "ZZZZZ9").await;
        assert!(snapshot.is_none());

        let (_updates_rx, snapshot) = open_game_stream(&state, "not-a-code").await;
        assert!(snapshot.is_none());
    }

    #[tokio::test]
    async fn stream_payloads_are_scoped_to_the_subscribed_game() {
        let state = app_state();
        let created = create_game(&state, "Rhea").await;

        let update = GameUpdate {
            game_id: created.game_id.clone(),
            action: GameAction::GameCreated,
            game: created.game.clone(),
            guess: None,
            emitted_at: Utc::now(),
        };

        assert!(stream_update_payload(&update, "ZZZZZZ").is_none());

        let payload = stream_update_payload(&update, &created.game_id).unwrap();
        assert_eq!(payload["event_type"], "GAME_UPDATED");
        assert_eq!(payload["game_id"], created.game_id.as_str());
        assert_eq!(payload["action"], "GAME_CREATED");
        assert_eq!(payload["game"]["game_status"], "waiting");
        assert!(payload["guess"].is_null());
    }
}
