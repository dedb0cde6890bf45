use minesweeper_agent as ma;
use minesweeper_agent::BoardEnvironment;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub fn create_game(size: u8, mines: u8) -> Vec<u8> {
    console_error_panic_hook::set_once();

    let game = ma::Game::new(size as usize, size as usize, mines as usize);
    game.serialize()
}

/// Plays one agent turn and returns the updated session bytes.
#[wasm_bindgen]
pub fn advance(bts: Vec<u8>) -> Result<Vec<u8>, String> {
    console_error_panic_hook::set_once();

    let mut game = ma::Game::deserialize(&bts);
    game.step(&mut rand::rng()).map_err(|e| e.to_string())?;
    Ok(game.serialize())
}

/// 0 = playing, 1 = won, 2 = lost.
#[wasm_bindgen]
pub fn game_state(bts: Vec<u8>) -> u8 {
    console_error_panic_hook::set_once();

    match ma::Game::deserialize(&bts).state() {
        ma::GameState::Playing => 0,
        ma::GameState::Won => 1,
        ma::GameState::Lost => 2,
    }
}

/// The board as the agent knows it, row-major: -1 unknown, -2 flagged mine,
/// otherwise the revealed neighbor count.
#[wasm_bindgen]
pub fn get_cells(bts: Vec<u8>) -> Vec<i8> {
    console_error_panic_hook::set_once();

    let game = ma::Game::deserialize(&bts);
    let kb = game.agent().knowledge();
    let (height, width) = kb.dimensions();
    (0..height)
        .flat_map(|row| (0..width).map(move |col| ma::Cell { row, col }))
        .map(|cell| {
            if kb.moves_made().contains(&cell) {
                game.board().nearby_mines(cell).unwrap() as i8
            } else if kb.known_mine().contains(&cell) {
                -2
            } else {
                -1
            }
        })
        .collect()
}
