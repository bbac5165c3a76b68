use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use gamemode_bridge::{
    ActorId, CommandInvocation, CommandScope, Dispatcher, GameMode, HandlerResult, Server,
    WaitError,
};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::info;

const COLOR_WHITE: i64 = -1;
const DIALOG_STYLE_MSGBOX: i64 = 0;
/// Dialog id that hides whatever dialog the player sees.
const DIALOG_ID_NONE: i64 = -1;
const DIALOG_ID_TEST: i64 = 1;
const DIALOG_TEST_DURATION: Duration = Duration::from_secs(2);
const DIALOG_RESPONSE_CALLBACK: &str = "OnDialogResponse";
const PLAYER_DEATH_CALLBACK: &str = "OnPlayerDeath";
const DEFAULT_AMMO: i32 = 30;
const HELP: &str =
    "/reverse, /myfirstcommand, /pos, /kickme, /kick, /weapon, /give, /enter, /dialogtest, /asyncdialog";

#[derive(Default)]
pub struct TestMode {
    ticks: Rc<Cell<u64>>,
    dialogs: Dialogs,
}

impl TestMode {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The dialog each player currently sees. The server keeps one dialog per
/// player, so showing another supersedes it.
#[derive(Clone, Default)]
struct Dialogs {
    shown: Rc<RefCell<HashMap<ActorId, ShownDialog>>>,
    next_id: Rc<Cell<u64>>,
}

struct ShownDialog {
    id: u64,
    superseded: oneshot::Sender<()>,
}

impl Dialogs {
    /// Record a new dialog for `player`. The returned receiver fires when a
    /// later dialog replaces this one.
    fn show(&self, player: ActorId) -> (u64, oneshot::Receiver<()>) {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let (superseded, replaced) = oneshot::channel();
        let previous = self
            .shown
            .borrow_mut()
            .insert(player, ShownDialog { id, superseded });
        if let Some(previous) = previous {
            let _ = previous.superseded.send(());
        }
        (id, replaced)
    }

    /// Forget dialog `id` if it is still the one `player` sees.
    fn close(&self, player: ActorId, id: u64) -> bool {
        let mut shown = self.shown.borrow_mut();
        if shown.get(&player).is_some_and(|dialog| dialog.id == id) {
            shown.remove(&player);
            true
        } else {
            false
        }
    }
}

fn send_client_message(server: &Server, player: ActorId, message: impl Into<String>) -> HandlerResult {
    server.invoke_native(
        "SendClientMessage",
        vec![json!(player), json!(COLOR_WHITE), Value::String(message.into())],
    )?;
    Ok(())
}

fn show_dialog(server: &Server, player: ActorId, id: Value, caption: &str, info: &str) -> HandlerResult {
    server.invoke_native(
        "ShowPlayerDialog",
        vec![
            json!(player),
            id,
            json!(DIALOG_STYLE_MSGBOX),
            json!(caption),
            json!(info),
            json!("Don't click me!"),
            json!(""),
        ],
    )?;
    Ok(())
}

/// Player that issued the command. Every command below is player-scoped.
fn issuer(invocation: &CommandInvocation) -> anyhow::Result<ActorId> {
    invocation
        .player()
        .ok_or_else(|| anyhow::anyhow!("/{} needs a player", invocation.name))
}

impl GameMode for TestMode {
    fn register(&self, events: &mut Dispatcher) {
        events.on_initialized(|server| async move {
            info!("The game mode has loaded.");
            server.invoke_native(
                "AddPlayerClass",
                vec![json!(0), json!(0.0), json!(0.0), json!(0.0), json!(0.0)],
            )?;
            server.invoke_native("SetGameModeText", vec![json!("Before delay")])?;

            server.delay(Duration::from_millis(10)).await?;
            info!("Waited 10ms after load.");
            server.invoke_native("SetGameModeText", vec![json!("After delay")])?;
            info!("RCON commands: sd (shut down), msg <text> (print it reversed)");
            Ok(())
        });

        events.on_exit(|_| async {
            info!("The game mode is unloading.");
            Ok(())
        });

        let ticks = Rc::clone(&self.ticks);
        events.on_tick(move |_| {
            let tick = ticks.get();
            ticks.set(tick + 1);
            async move {
                if tick % 1000 == 0 {
                    info!(tick, "Server is still ticking...");
                }
                Ok(())
            }
        });

        events.on_player_connected(|_, player| async move {
            info!(%player, "Player connected");
            Ok(())
        });

        events.on_player_disconnected(|_, player, reason| async move {
            info!(%player, %reason, "Player disconnected");
            Ok(())
        });

        events.on_callback(PLAYER_DEATH_CALLBACK, |_, callback| async move {
            info!(player = ?callback.player, "Death");
            Ok(())
        });

        events.on_callback(DIALOG_RESPONSE_CALLBACK, |server, callback| async move {
            let Some(player) = callback.player else {
                return Ok(());
            };
            if callback.args.first().and_then(Value::as_i64) != Some(DIALOG_ID_TEST) {
                return Ok(());
            }
            let button = callback.args.get(1).and_then(Value::as_i64).unwrap_or_default();
            send_client_message(
                &server,
                player,
                format!("You responded to the dialog with button {button}"),
            )
        });

        events.on_rcon_command(|server, command| async move {
            info!(%command, "Received RCON command");
            if command == "sd" {
                info!("Shutting down...");
                server.shut_down();
            } else if let Some(text) = command.strip_prefix("msg ") {
                let reversed: String = text.chars().rev().collect();
                server.print(reversed)?;
            }
            Ok(())
        });

        register_commands(events);
        register_dialog_commands(events, &self.dialogs);
    }
}

fn register_commands(events: &mut Dispatcher) {
    events.register_command("help", CommandScope::Player, |server, invocation| async move {
        let player = issuer(&invocation)?;
        send_client_message(&server, player, HELP)
    });

    events.register_command("reverse", CommandScope::Player, |server, invocation| async move {
        let player = issuer(&invocation)?;
        let reversed: String = invocation.args.chars().rev().collect();
        send_client_message(&server, player, format!("Reversed: {reversed}"))
    });

    events.register_command("myfirstcommand", CommandScope::Player, |server, invocation| async move {
        let player = issuer(&invocation)?;
        send_client_message(&server, player, format!("Hello, world! You said {}", invocation.args))
    });

    events.register_command("pos", CommandScope::Player, |server, invocation| async move {
        let player = issuer(&invocation)?;
        let position = server.call_native("GetPlayerPos", vec![json!(player)]).await?;
        send_client_message(&server, player, format!("Position: {position}"))?;

        server.delay(Duration::from_secs(1)).await?;
        send_client_message(&server, player, "Still here!")
    });

    events.register_command("kickme", CommandScope::Player, |server, invocation| async move {
        let player = issuer(&invocation)?;
        send_client_message(&server, player, "Bye!")?;
        // The message must reach the client before the kick does.
        server.delay(Duration::from_millis(10)).await?;
        server.invoke_native("Kick", vec![json!(player)])?;
        Ok(())
    });

    events.register_command("kick", CommandScope::Player, |server, invocation| async move {
        let player = issuer(&invocation)?;
        let Some(target) = invocation.arg::<u32>(0).map(ActorId::new) else {
            return send_client_message(&server, player, "Usage: /kick <player>");
        };
        server.invoke_native("Kick", vec![json!(target)])?;
        Ok(())
    });

    events.register_command("weapon", CommandScope::Player, |server, invocation| async move {
        let player = issuer(&invocation)?;
        let Some(weapon) = invocation.arg::<i32>(0) else {
            return send_client_message(&server, player, "Usage: /weapon <weapon> [ammo]");
        };
        let ammo = invocation.arg::<i32>(1).unwrap_or(DEFAULT_AMMO);
        server.invoke_native("GivePlayerWeapon", vec![json!(player), json!(weapon), json!(ammo)])?;
        send_client_message(&server, player, format!("Enjoy your weapon {weapon} with {ammo} ammo!"))
    });

    events.register_command("give", CommandScope::Player, |server, invocation| async move {
        let player = issuer(&invocation)?;
        let (Some(weapon), Some(ammo)) = (invocation.arg::<i32>(0), invocation.arg::<i32>(1)) else {
            return send_client_message(&server, player, "Usage: /give <weapon> <ammo>");
        };
        server.invoke_native("GivePlayerWeapon", vec![json!(player), json!(weapon), json!(ammo)])?;
        Ok(())
    });

    events.register_command("enter", CommandScope::Player, |server, invocation| async move {
        let player = issuer(&invocation)?;
        let Some(vehicle) = invocation.arg::<i32>(0) else {
            return send_client_message(&server, player, "Usage: /enter <vehicle>");
        };
        server.invoke_native("PutPlayerInVehicle", vec![json!(player), json!(vehicle), json!(0)])?;
        Ok(())
    });
}

fn register_dialog_commands(events: &mut Dispatcher, dialogs: &Dialogs) {
    let shown = dialogs.clone();
    events.register_command("dialogtest", CommandScope::Player, move |server, invocation| {
        let dialogs = shown.clone();
        async move {
            let player = issuer(&invocation)?;
            let (id, _replaced) = dialogs.show(player);
            send_client_message(&server, player, "Showing dialog")?;
            show_dialog(
                &server,
                player,
                json!(DIALOG_ID_TEST),
                "Test dialog",
                "This message should hide in 2 seconds.",
            )?;

            match server.delay(DIALOG_TEST_DURATION).await {
                Ok(()) => {}
                Err(WaitError::ActorInvalidated(_)) => {
                    dialogs.close(player, id);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            // A dialog shown since then is not ours to hide.
            if dialogs.close(player, id) {
                send_client_message(&server, player, "Hiding dialog")?;
                server.invoke_native(
                    "ShowPlayerDialog",
                    vec![
                        json!(player),
                        json!(DIALOG_ID_NONE),
                        json!(DIALOG_STYLE_MSGBOX),
                        json!(""),
                        json!(""),
                        json!(""),
                        json!(""),
                    ],
                )?;
            }
            Ok(())
        }
    });

    let shown = dialogs.clone();
    events.register_command("asyncdialog", CommandScope::Player, move |server, invocation| {
        let dialogs = shown.clone();
        async move {
            let player = issuer(&invocation)?;
            let token = server.mint_token();
            let answer = server.wait_response(token);
            let (id, replaced) = dialogs.show(player);
            info!(%player, "Showing dialog");
            show_dialog(
                &server,
                player,
                json!(token),
                "Async dialog test",
                "Quit the game with this dialog still open.",
            )?;

            let outcome = tokio::select! {
                biased;
                outcome = answer => outcome,
                _ = replaced => {
                    info!(%player, "Dialog replaced before it was answered");
                    return Ok(());
                }
            };
            dialogs.close(player, id);

            match outcome {
                Ok(response) => {
                    info!(%player, %response, "Dialog answered");
                    send_client_message(&server, player, format!("You answered {response}"))
                }
                Err(WaitError::ActorInvalidated(player)) => {
                    info!(%player, "Player left while the dialog was open.");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
    });
}
