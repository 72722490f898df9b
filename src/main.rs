// src/main.rs - Host binary running the controller against loopback joints
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use joint_trajectory_rs::communication::{CancelResponse, GoalRequest};
use joint_trajectory_rs::{
    ActionServer, ControlLoop, GoalExchange, JointTrajectory, JointTrajectoryController, JointTrajectoryPoint,
    LoopbackHardware, LoopbackMode, SpeedScaling, load_config,
};

const EVENT_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "jtc-host", version, about = "Run a joint trajectory controller against simulated joints")]
struct Args {
    /// Controller configuration file
    #[arg(short, long, default_value = "config/controller.toml")]
    config: PathBuf,

    /// Goal to execute, as JSON. A built-in demo move is used when omitted.
    #[arg(short, long)]
    goal: Option<PathBuf>,

    /// Speed scaling factor applied after start-up
    #[arg(short, long)]
    scaling: Option<f64>,

    /// Fraction of the remaining distance the simulated joints cover per cycle
    #[arg(long, default_value_t = 1.0)]
    tracking_ratio: f64,

    /// Cancel the goal after this many seconds
    #[arg(long)]
    cancel_after: Option<f64>,

    /// Log every feedback message
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    tracing::info!("Loading configuration from: {}", args.config.display());
    let config = load_config(&args.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", args.config.display(), e);
        e
    })?;
    tracing::info!("Joints: {}", config.joints.join(", "));
    tracing::info!("Update rate: {} Hz", config.update_rate);

    let exchange = Arc::new(GoalExchange::new(SpeedScaling::default()));
    let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
    let mut controller = JointTrajectoryController::new(exchange.clone(), events_tx);
    controller.on_configure(config.clone())?;

    let server = ActionServer::new(&config, exchange.clone());
    let dispatcher = server.spawn_dispatcher(events_rx);

    let mode = if args.tracking_ratio >= 1.0 {
        LoopbackMode::Mirror
    } else {
        LoopbackMode::Lagged {
            ratio: args.tracking_ratio,
        }
    };
    let hardware = LoopbackHardware::new(vec![0.0; config.dof()], mode);
    let control_loop = ControlLoop::new(controller, hardware)?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(control_loop.run(shutdown_rx));

    // wait for activation before sending goals
    while !exchange.is_accepting() {
        if loop_handle.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let request = match &args.goal {
        Some(path) => {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str::<GoalRequest>(&contents)?
        }
        None => demo_goal(&config.joints),
    };

    if let Some(factor) = args.scaling {
        exchange.scaling().set(factor);
    }

    let outcome = run_goal(&server, request, &args).await;

    let _ = shutdown_tx.send(());
    let control_loop = loop_handle.await??;
    tracing::info!(
        "Final joint positions: {:?} after {} cycles",
        control_loop.hardware().positions(),
        control_loop.cycles()
    );
    drop(control_loop);
    dispatcher.await?;

    outcome
}

async fn run_goal(
    server: &ActionServer,
    request: GoalRequest,
    args: &Args,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let mut handle = server.send_goal(request)?;
    let id = handle.id();
    tracing::info!("Goal {} accepted", id);

    let cancel_at = args
        .cancel_after
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map(|delay| tokio::time::Instant::now() + delay);
    let mut cancel_sent = false;
    let mut received = 0usize;

    loop {
        tokio::select! {
            feedback = handle.next_feedback() => {
                let Some(feedback) = feedback else { break };
                received += 1;
                if args.verbose {
                    tracing::debug!(
                        "t={:.3}s desired={:?} actual={:?}",
                        feedback.desired.time_from_start.as_secs_f64(),
                        feedback.desired.positions,
                        feedback.actual.positions
                    );
                }
            }
            _ = sleep_until(cancel_at), if !cancel_sent => {
                cancel_sent = true;
                if server.cancel_goal(id) == CancelResponse::Reject {
                    tracing::warn!("Cancel request for goal {} was rejected", id);
                }
            }
        }
    }

    let result = handle.result().await?;
    tracing::info!(
        "Goal {} finished with {:?} ({:?}) after {} feedback messages: {}",
        id,
        result.status(),
        result.error_code,
        received,
        result.error_string
    );
    Ok(())
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Swing every joint out and back.
fn demo_goal(joints: &[String]) -> GoalRequest {
    let out: Vec<f64> = (0..joints.len()).map(|j| if j % 2 == 0 { 0.5 } else { -0.5 }).collect();
    GoalRequest::new(JointTrajectory::new(
        joints.to_vec(),
        vec![
            JointTrajectoryPoint::new(out, Duration::from_secs(2)),
            JointTrajectoryPoint::new(vec![0.0; joints.len()], Duration::from_secs(4)),
        ],
    ))
}
