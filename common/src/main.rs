use minesweeper_agent::*;
use std::thread;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    // --- 1. Initialization ---
    let mut game = Game::new(10, 10, 15);
    let mut rng = rand::rng();

    println!("--- Autonomous Minesweeper Agent ---");
    println!("Strategy: play cells proven safe by deduction, guess only when logic runs dry.");
    println!("Initial Board:");
    print_board(&game);
    thread::sleep(Duration::from_secs(1));

    // --- 2. Game Loop ---
    let mut move_count = 0;
    while game.state() == GameState::Playing {
        move_count += 1;
        println!("\n--- Move #{} ---", move_count);

        // --- 3. Play One Turn ---
        match game.step(&mut rng)? {
            Turn::Deduced(cell, count) => {
                println!(
                    "Deduction proved ({}, {}) safe. It shows {}.",
                    cell.row, cell.col, count
                );
            }
            Turn::Guessed(cell, count) => {
                println!(
                    "No safe cell known. Guessed ({}, {}) and survived. It shows {}.",
                    cell.row, cell.col, count
                );
            }
            Turn::Exploded(cell) => {
                println!("Guessed ({}, {}) and hit a mine.", cell.row, cell.col);
            }
            Turn::Exhausted => {
                println!("Every remaining cell is a flagged mine.");
            }
        }

        print_board(&game);
        thread::sleep(Duration::from_millis(200));
    }

    // --- 4. Final Result ---
    println!("\n--- Game Over ---");
    let kb = game.agent().knowledge();
    println!(
        "Revealed {} cells, flagged {} of {} mines.",
        kb.moves_made().len(),
        kb.known_mine().len(),
        game.board().mine_count()
    );
    match game.state() {
        GameState::Won => println!("Result: the agent cleared the board!"),
        GameState::Lost => println!("Result: the agent hit a mine and lost."),
        GameState::Playing => println!("Result: the game ended unexpectedly."),
    }

    Ok(())
}

/// Renders the board as the agent knows it: revealed counts, flagged mines,
/// and unknown cells.
fn print_board(game: &Game) {
    let kb = game.agent().knowledge();
    let (height, width) = game.board().dimensions();

    // Print header
    print!("   ");
    for col in 0..width {
        print!("{:^3}", col);
    }
    println!("\n  +{}", "---".repeat(width));

    // Print rows
    for row in 0..height {
        print!("{:^2}|", row);
        for col in 0..width {
            let cell = Cell { row, col };
            let display = if kb.moves_made().contains(&cell) {
                format!(" {} ", game.board().nearby_mines(cell).unwrap())
            } else if kb.known_mine().contains(&cell) {
                " ⚑ ".to_string()
            } else {
                " ■ ".to_string()
            };
            print!("{}", display);
        }
        println!();
    }
    println!();
}
