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

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const BOARD_SIZE: usize = 25;
pub const STARTING_TEAM_WORDS: usize = 9;
pub const OTHER_TEAM_WORDS: usize = 8;
pub const NEUTRAL_WORDS: usize = 7;
pub const MAX_PLAYERS: usize = 8;
pub const MIN_PLAYERS_TO_START: usize = 4;
pub const MAX_CLUE_NUMBER: u8 = 9;
pub const GAME_CODE_LEN: usize = 6;

/// Raw board vocabulary. Repeated spellings are collapsed by
/// [`default_word_bank`] before any board is dealt.
pub const WORD_BANK: [&str; 110] = [
    "HOLLYWOOD", "WELL", "FOOT", "NEW YORK", "SPRING", "COURT", "TUBE", "POINT", "TABLET", "SLIP",
    "DATE", "DRILL", "LEMON", "BELL", "SCREEN", "FAIR", "TORCH", "STATE", "MATCH", "IRON",
    "BLOCK", "FRANCE", "AUSTRALIA", "LIMOUSINE", "STREAM", "GLOVE", "NURSE", "WIZARD", "TOWER",
    "BOND", "THUMB", "MICROSCOPE", "HOTEL", "SHARK", "BUTTERFLY", "SHOVEL", "WHISTLE", "TAIL",
    "PAINT", "MOUTH", "MILLIONAIRE", "LONDON", "BRIDGE", "APPLE", "COMPUTER", "HELICOPTER",
    "PLASTIC", "DUCK", "STADIUM", "FLUTE", "CAKE", "TEACHER", "EAGLE", "FIRE", "MOUNTAIN",
    "GLASSES", "GHOST", "PIANO", "AMBULANCE", "BATTERY", "GOLD", "GREECE", "HOUSE", "TELEPHONE",
    "CHAIR", "FISH", "LASER", "SCALE", "SOAP", "STONE", "FOREST", "BANK", "BOOM", "CAT", "SHOT",
    "SUIT", "CHOCOLATE", "ROULETTE", "MERCURY", "MOON", "INDIA", "DIAMOND", "KNEE", "PAPER",
    "TURKEY", "ROCK", "ROBOT", "GRASS", "ROME", "PRINCESS", "PIPE", "LOCK", "ENGLAND", "POISON",
    "SAND", "SUNRISE", "BUG", "HEART", "GERMANY", "KNIFE", "MILITARY", "BACK", "CROWN", "FIGHTER",
    "MODEL", "CHINA", "PYRAMID", "DANCE", "FIRE", "WATER",
];

pub type PlayerId = String;
pub type GameId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Red,
    Blue,
}

impl Team {
    pub fn opponent(self) -> Team {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Team::Red => write!(f, "red"),
            Team::Blue => write!(f, "blue"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WordType {
    Red,
    Blue,
    Neutral,
    Assassin,
}

impl WordType {
    /// The team whose agent hides behind this cell, if any.
    pub fn team(self) -> Option<Team> {
        match self {
            WordType::Red => Some(Team::Red),
            WordType::Blue => Some(Team::Blue),
            WordType::Neutral | WordType::Assassin => None,
        }
    }
}

impl From<Team> for WordType {
    fn from(team: Team) -> Self {
        match team {
            Team::Red => WordType::Red,
            Team::Blue => WordType::Blue,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerRole {
    Spymaster,
    Operative,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Waiting,
    InProgress,
    Completed,
}

/// Taxonomy bucket for a [`GameError`], mainly used to pick a transport
/// status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Precondition,
    TurnViolation,
    InputViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("game not found")]
    GameNotFound,
    #[error("player not found")]
    PlayerNotFound,
    #[error("game already started")]
    GameAlreadyStarted,
    #[error("game already in progress")]
    CannotJoinStartedGame,
    #[error("game is full (maximum 8 players)")]
    GameFull,
    #[error("game is not in progress")]
    GameNotInProgress,
    #[error("need at least 4 players to start (2 per team)")]
    NotEnoughPlayers,
    #[error("both teams need at least one player")]
    TeamMissingPlayers,
    #[error("both teams need a spymaster")]
    TeamMissingSpymaster,
    #[error("{team} team already has a spymaster")]
    SpymasterSeatTaken { team: Team },
    #[error("not your team's turn")]
    WrongTurn,
    #[error("only spymasters can give clues")]
    NotSpymaster,
    #[error("only operatives can make guesses")]
    NotOperative,
    #[error("clue already given this turn")]
    DuplicateClue,
    #[error("no clue given yet")]
    NoClueYet,
    #[error("maximum guesses exceeded")]
    GuessLimitExceeded,
    #[error("clue number must be between 0 and 9")]
    InvalidNumber,
    #[error("clue word cannot be empty")]
    EmptyClue,
    #[error("clue word cannot be related to a word on the board")]
    RelatedToBoardWord,
    #[error("word index out of range")]
    IndexOutOfRange,
    #[error("word already guessed")]
    AlreadyGuessed,
}

impl GameError {
    /// Stable machine-readable reason code for transports and logs.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::GameNotFound => "GAME_NOT_FOUND",
            GameError::PlayerNotFound => "PLAYER_NOT_FOUND",
            GameError::GameAlreadyStarted => "GAME_ALREADY_STARTED",
            GameError::CannotJoinStartedGame => "CANNOT_JOIN_STARTED_GAME",
            GameError::GameFull => "GAME_FULL",
            GameError::GameNotInProgress => "GAME_NOT_IN_PROGRESS",
            GameError::NotEnoughPlayers => "NOT_ENOUGH_PLAYERS",
            GameError::TeamMissingPlayers => "TEAM_MISSING_PLAYERS",
            GameError::TeamMissingSpymaster => "TEAM_MISSING_SPYMASTER",
            GameError::SpymasterSeatTaken { .. } => "SPYMASTER_SEAT_TAKEN",
            GameError::WrongTurn => "WRONG_TURN",
            GameError::NotSpymaster => "NOT_SPYMASTER",
            GameError::NotOperative => "NOT_OPERATIVE",
            GameError::DuplicateClue => "DUPLICATE_CLUE",
            GameError::NoClueYet => "NO_CLUE_YET",
            GameError::GuessLimitExceeded => "GUESS_LIMIT_EXCEEDED",
            GameError::InvalidNumber => "INVALID_NUMBER",
            GameError::EmptyClue => "EMPTY_CLUE",
            GameError::RelatedToBoardWord => "RELATED_TO_BOARD_WORD",
            GameError::IndexOutOfRange => "INDEX_OUT_OF_RANGE",
            GameError::AlreadyGuessed => "ALREADY_GUESSED",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GameError::GameNotFound | GameError::PlayerNotFound => ErrorKind::NotFound,
            GameError::GameAlreadyStarted
            | GameError::CannotJoinStartedGame
            | GameError::GameFull
            | GameError::GameNotInProgress
            | GameError::NotEnoughPlayers
            | GameError::TeamMissingPlayers
            | GameError::TeamMissingSpymaster
            | GameError::SpymasterSeatTaken { .. } => ErrorKind::Precondition,
            GameError::WrongTurn
            | GameError::NotSpymaster
            | GameError::NotOperative
            | GameError::DuplicateClue
            | GameError::NoClueYet
            | GameError::GuessLimitExceeded => ErrorKind::TurnViolation,
            GameError::InvalidNumber
            | GameError::EmptyClue
            | GameError::RelatedToBoardWord
            | GameError::IndexOutOfRange
            | GameError::AlreadyGuessed => ErrorKind::InputViolation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub team: Team,
    pub role: PlayerRole,
}

impl Player {
    /// New lobby entrant with the defaults every player starts from.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            team: Team::Red,
            role: PlayerRole::Operative,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clue {
    pub spymaster: PlayerId,
    pub team: Team,
    pub word: String,
    /// Declared related-word count (0-9).
    pub number: u8,
    pub seq: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Guess {
    pub player: PlayerId,
    pub word_index: usize,
    pub correct: bool,
    pub seq: u64,
    pub created_at: DateTime<Utc>,
}

/// Per-team spymaster seats. A vacant seat is an explicit `None` so seat
/// lookups stay total.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Spymasters {
    pub red: Option<PlayerId>,
    pub blue: Option<PlayerId>,
}

impl Spymasters {
    pub fn holder(&self, team: Team) -> Option<&PlayerId> {
        match team {
            Team::Red => self.red.as_ref(),
            Team::Blue => self.blue.as_ref(),
        }
    }

    pub fn set_holder(&mut self, team: Team, player_id: Option<PlayerId>) {
        match team {
            Team::Red => self.red = player_id,
            Team::Blue => self.blue = player_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameState {
    pub game_id: GameId,
    pub words: Vec<String>,
    pub word_types: Vec<WordType>,
    pub current_team: Team,
    pub spymasters: Spymasters,
    pub players: HashMap<PlayerId, Player>,
    pub clues: Vec<Clue>,
    pub guesses: Vec<Guess>,
    pub game_status: GameStatus,
    pub winner: Option<Team>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl GameState {
    /// Ordering token for the next appended clue or guess. Derived from the
    /// log lengths so it is strictly monotonic without a stored counter.
    pub fn next_seq(&self) -> u64 {
        (self.clues.len() + self.guesses.len()) as u64 + 1
    }

    pub fn team_players(&self, team: Team) -> impl Iterator<Item = &Player> {
        self.players.values().filter(move |player| player.team == team)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGameRequest {
    pub player_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGameResponse {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub game: GameState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinGameRequest {
    pub player_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinGameResponse {
    pub player_id: PlayerId,
    pub game: GameState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchTeamRequest {
    pub player_id: PlayerId,
    pub team: Team,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRoleRequest {
    pub player_id: PlayerId,
    pub role: PlayerRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiveClueRequest {
    pub player_id: PlayerId,
    pub word: String,
    /// Declared related-word count. Signed on the wire so an out-of-range
    /// value is rejected by clue validation rather than by the decoder.
    pub number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakeGuessRequest {
    pub player_id: PlayerId,
    /// Board cell to reveal. Signed on the wire, range-checked by guess
    /// validation.
    pub word_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakeGuessResponse {
    pub correct: bool,
    pub should_end_turn: bool,
    pub winner: Option<Team>,
    pub game: GameState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndTurnRequest {
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameAction {
    GameCreated,
    PlayerJoined,
    TeamSwitched,
    RoleChanged,
    GameStarted,
    ClueGiven,
    GuessMade,
    TurnEnded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuessOutcome {
    pub player_id: PlayerId,
    pub word_index: usize,
    pub correct: bool,
    pub should_end_turn: bool,
    pub winner: Option<Team>,
}

/// Snapshot pushed to stream subscribers after every successful mutating
/// command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameUpdate {
    pub game_id: GameId,
    pub action: GameAction,
    pub game: GameState,
    pub guess: Option<GuessOutcome>,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Board {
    pub words: Vec<String>,
    pub word_types: Vec<WordType>,
    pub starting_team: Team,
}

/// The built-in vocabulary, normalized and de-duplicated.
pub fn default_word_bank() -> Vec<String> {
    normalize_word_bank(WORD_BANK.iter().map(|word| word.to_string()))
}

/// Trim, uppercase and de-duplicate a vocabulary, keeping first-seen order.
pub fn normalize_word_bank<I>(words: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut bank = Vec::new();
    for word in words {
        let word = word.trim().to_uppercase();
        if word.is_empty() {
            continue;
        }
        if seen.insert(word.clone()) {
            bank.push(word);
        }
    }
    bank
}

/// Deal a fresh 25-cell board from the given vocabulary.
///
/// A coin flip picks the starting team; it receives 9 agent cells, the other
/// team 8, plus 7 neutrals and the assassin, all uniformly shuffled. The
/// bank must hold at least [`BOARD_SIZE`] distinct entries, which both
/// [`default_word_bank`] and the service's config loader guarantee.
pub fn generate_board(word_bank: &[String]) -> Board {
    let mut rng = rand::rng();

    let mut words = word_bank.to_vec();
    words.shuffle(&mut rng);
    words.truncate(BOARD_SIZE);

    let starting_team = if rng.random_bool(0.5) {
        Team::Red
    } else {
        Team::Blue
    };

    let mut word_types = Vec::with_capacity(BOARD_SIZE);
    for _ in 0..STARTING_TEAM_WORDS {
        word_types.push(WordType::from(starting_team));
    }
    for _ in 0..OTHER_TEAM_WORDS {
        word_types.push(WordType::from(starting_team.opponent()));
    }
    for _ in 0..NEUTRAL_WORDS {
        word_types.push(WordType::Neutral);
    }
    word_types.push(WordType::Assassin);
    word_types.shuffle(&mut rng);

    Board {
        words,
        word_types,
        starting_team,
    }
}

const GAME_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Mint a short game code players can read out loud.
pub fn generate_game_code() -> GameId {
    let mut rng = rand::rng();
    (0..GAME_CODE_LEN)
        .map(|_| GAME_CODE_CHARSET[rng.random_range(0..GAME_CODE_CHARSET.len())] as char)
        .collect()
}

/// Uppercase a client-supplied game code and check it has the issued shape.
pub fn normalize_game_code(raw: &str) -> Option<GameId> {
    let candidate = raw.trim().to_ascii_uppercase();
    let re = Regex::new(r"^[A-Z0-9]{6}$").unwrap();
    if re.is_match(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

/// Ordering token of the most recent guess by the team that is not on turn,
/// or 0 when the current turn reaches back to the start of the game.
///
/// Recomputed from the append-only logs on every call; the logs are the
/// single source of truth for the turn window.
pub fn turn_start_seq(game: &GameState) -> u64 {
    for guess in game.guesses.iter().rev() {
        let other_team = game
            .players
            .get(&guess.player)
            .map(|player| player.team != game.current_team)
            .unwrap_or(false);
        if other_team {
            return guess.seq;
        }
    }
    0
}

/// Most recent clue the current team gave inside the current turn window.
pub fn current_clue(game: &GameState) -> Option<&Clue> {
    let window_start = turn_start_seq(game);
    game.clues
        .iter()
        .rev()
        .find(|clue| clue.team == game.current_team && clue.seq >= window_start)
}

/// Guesses the current team has already spent on the current clue.
pub fn current_turn_guesses(game: &GameState) -> Vec<&Guess> {
    let Some(clue) = current_clue(game) else {
        return Vec::new();
    };

    game.guesses
        .iter()
        .filter(|guess| {
            guess.seq > clue.seq
                && game
                    .players
                    .get(&guess.player)
                    .map(|player| player.team == game.current_team)
                    .unwrap_or(false)
        })
        .collect()
}

/// Decide the winner from the guess log, if the game has been decided.
pub fn check_win_condition(game: &GameState) -> Option<Team> {
    // A revealed assassin decides the game outright, overriding the counts.
    let assassin_guess = game
        .guesses
        .iter()
        .find(|guess| game.word_types.get(guess.word_index) == Some(&WordType::Assassin));
    if let Some(guess) = assassin_guess
        && let Some(guesser) = game.players.get(&guess.player)
    {
        return Some(guesser.team.opponent());
    }

    if remaining_words(game, Team::Red) == 0 {
        return Some(Team::Red);
    }
    if remaining_words(game, Team::Blue) == 0 {
        return Some(Team::Blue);
    }

    None
}

/// Count a team's agent cells that no guess has revealed yet.
pub fn remaining_words(game: &GameState, team: Team) -> usize {
    game.word_types
        .iter()
        .enumerate()
        .filter(|(index, word_type)| {
            **word_type == WordType::from(team)
                && !game.guesses.iter().any(|guess| guess.word_index == *index)
        })
        .count()
}

/// Reject an ill-formed or out-of-turn clue. Checks run in a fixed order so
/// a caller always sees the most specific failure.
pub fn validate_clue(
    game: &GameState,
    player_id: &str,
    word: &str,
    number: i64,
) -> Result<(), GameError> {
    let player = game.players.get(player_id).ok_or(GameError::PlayerNotFound)?;

    if player.role != PlayerRole::Spymaster {
        return Err(GameError::NotSpymaster);
    }
    if player.team != game.current_team {
        return Err(GameError::WrongTurn);
    }
    if game.game_status != GameStatus::InProgress {
        return Err(GameError::GameNotInProgress);
    }
    if current_clue(game).is_some() {
        return Err(GameError::DuplicateClue);
    }
    if number < 0 || number > MAX_CLUE_NUMBER as i64 {
        return Err(GameError::InvalidNumber);
    }
    if word.trim().is_empty() {
        return Err(GameError::EmptyClue);
    }

    // Substring relation in either direction, against every board word,
    // revealed or not.
    let clue_word = word.trim().to_lowercase();
    let related = game.words.iter().any(|board_word| {
        let board_word = board_word.to_lowercase();
        board_word.contains(&clue_word) || clue_word.contains(&board_word)
    });
    if related {
        return Err(GameError::RelatedToBoardWord);
    }

    Ok(())
}

/// Reject an out-of-turn, out-of-range or over-budget guess.
pub fn validate_guess(game: &GameState, player_id: &str, word_index: i64) -> Result<(), GameError> {
    let player = game.players.get(player_id).ok_or(GameError::PlayerNotFound)?;

    if player.role != PlayerRole::Operative {
        return Err(GameError::NotOperative);
    }
    if player.team != game.current_team {
        return Err(GameError::WrongTurn);
    }
    if game.game_status != GameStatus::InProgress {
        return Err(GameError::GameNotInProgress);
    }
    if word_index < 0 || word_index >= BOARD_SIZE as i64 {
        return Err(GameError::IndexOutOfRange);
    }

    let word_index = word_index as usize;
    if game.guesses.iter().any(|guess| guess.word_index == word_index) {
        return Err(GameError::AlreadyGuessed);
    }

    let clue = current_clue(game).ok_or(GameError::NoClueYet)?;

    // Declared count plus one bonus guess.
    let max_guesses = clue.number as usize + 1;
    if current_turn_guesses(game).len() >= max_guesses {
        return Err(GameError::GuessLimitExceeded);
    }

    Ok(())
}

/// A neutral, opposing or assassin reveal hands the turn over; revealing an
/// own-team agent keeps it.
pub fn should_end_turn(game: &GameState, word_index: usize) -> bool {
    match game.word_types.get(word_index) {
        Some(WordType::Assassin | WordType::Neutral) => true,
        Some(word_type) => word_type.team() != Some(game.current_team),
        None => false,
    }
}
