// End-to-end goal handling with the control loop running on the tokio runtime

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc};
    use tokio::task::JoinHandle;

    use joint_trajectory_rs::communication::{CancelReason, CancelResponse, GoalOutcome, GoalRequest};
    use joint_trajectory_rs::scheduler::ControlLoopError;
    use joint_trajectory_rs::{
        ActionServer, ControlLoop, ControllerConfig, GoalExchange, GoalStatus, JointTrajectory,
        JointTrajectoryController, JointTrajectoryPoint, LoopbackHardware, LoopbackMode,
    };

    type LoopHandle = JoinHandle<Result<ControlLoop<LoopbackHardware>, ControlLoopError>>;

    async fn spawn_controller() -> (ActionServer, broadcast::Sender<()>, LoopHandle, JoinHandle<()>) {
        let config = ControllerConfig {
            joints: vec!["a".into(), "b".into()],
            update_rate: 200,
            ..Default::default()
        };
        let exchange = Arc::new(GoalExchange::default());
        let (events_tx, events_rx) = mpsc::channel(256);
        let mut controller = JointTrajectoryController::new(exchange.clone(), events_tx);
        controller.on_configure(config.clone()).unwrap();

        let server = ActionServer::new(&config, exchange.clone());
        let dispatcher = server.spawn_dispatcher(events_rx);
        let hardware = LoopbackHardware::new(vec![0.0, 0.0], LoopbackMode::Mirror);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let control_loop = ControlLoop::new(controller, hardware).unwrap();
        let loop_handle = tokio::spawn(control_loop.run(shutdown_rx));

        while !exchange.is_accepting() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        (server, shutdown_tx, loop_handle, dispatcher)
    }

    fn goal(target: [f64; 2], seconds: f64) -> GoalRequest {
        GoalRequest::new(JointTrajectory::new(
            vec!["a".into(), "b".into()],
            vec![JointTrajectoryPoint::new(target.to_vec(), Duration::from_secs_f64(seconds))],
        ))
    }

    #[tokio::test]
    async fn test_goal_completes_over_runtime() {
        let (server, shutdown_tx, loop_handle, dispatcher) = spawn_controller().await;

        let mut handle = server.send_goal(goal([0.4, -0.2], 0.1)).unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), handle.next_feedback())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.desired.positions.len(), 2);

        let result = tokio::time::timeout(Duration::from_secs(5), handle.result())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.status(), GoalStatus::Succeeded);

        shutdown_tx.send(()).unwrap();
        let control_loop = loop_handle.await.unwrap().unwrap();
        let positions = control_loop.hardware().positions();
        assert!((positions[0] - 0.4).abs() < 1e-9);
        assert!((positions[1] + 0.2).abs() < 1e-9);
        drop(control_loop);
        dispatcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_over_runtime() {
        let (server, shutdown_tx, loop_handle, _dispatcher) = spawn_controller().await;

        let mut handle = server.send_goal(goal([1.0, 1.0], 5.0)).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.next_feedback())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(server.cancel_goal(handle.id()), CancelResponse::Accept);

        let result = tokio::time::timeout(Duration::from_secs(5), handle.result())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.outcome, GoalOutcome::Canceled(CancelReason::Requested));

        shutdown_tx.send(()).unwrap();
        let control_loop = loop_handle.await.unwrap().unwrap();
        assert!(control_loop.hardware().positions()[0] < 1.0);
    }
}
