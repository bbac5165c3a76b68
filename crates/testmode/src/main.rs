//! Reference game mode.
//!
//! Connects to the channel named by `GAMEMODE_PIPE` (default
//! `gamemode-bridge`) and exercises every bridge feature: delays, native
//! calls with return values, correlated prompts, RCON and player commands.

mod game_mode;

use gamemode_bridge::GameModeBuilder;

use crate::game_mode::TestMode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    GameModeBuilder::from_env()
        .redirect_console_output()
        .use_game_mode(TestMode::new())
        .run()
        .await?;
    Ok(())
}
