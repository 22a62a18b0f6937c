//! FSM unit tests

use orchestrator::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeploymentStatus::Idle);
    assert!(fsm.error().is_none());
    assert!(!fsm.is_rolling_back());
    assert_eq!(fsm.retry_count(), 0);
}

#[test]
fn test_fsm_forward_success_flow() {
    let mut fsm = DeploymentFsm::new();

    // Idle -> Running
    fsm.process(DeploymentEvent::Start).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Running);

    // Running -> Running
    fsm.process(DeploymentEvent::JobSucceeded { last: false }).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Running);

    // Running -> Complete
    fsm.process(DeploymentEvent::JobSucceeded { last: true }).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Complete);
}

#[test]
fn test_fsm_failure_flow() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::JobFailed("test error".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), DeploymentStatus::Failed);
    assert_eq!(fsm.error(), Some("test error"));
}

#[test]
fn test_fsm_retry_after_failure() {
    let mut fsm = DeploymentFsm::new();

    // First attempt fails
    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::JobFailed("error 1".to_string()))
        .unwrap();

    // Retry fails again
    fsm.process(DeploymentEvent::Retry).unwrap();
    assert!(fsm.error().is_none());
    fsm.process(DeploymentEvent::JobFailed("error 2".to_string()))
        .unwrap();
    fsm.process(DeploymentEvent::Retry).unwrap();
    assert_eq!(fsm.retry_count(), 2);

    // A success resets the counter
    fsm.process(DeploymentEvent::JobSucceeded { last: false }).unwrap();
    assert_eq!(fsm.retry_count(), 0);
}

#[test]
fn test_fsm_rollback_lands_in_failed() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::JobFailed("boom".to_string())).unwrap();
    fsm.process(DeploymentEvent::Rollback).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Running);
    assert!(fsm.is_rolling_back());

    // Forward events are not accepted while rolling back
    assert!(fsm.process(DeploymentEvent::JobSucceeded { last: true }).is_err());

    fsm.process(DeploymentEvent::RollbackFinished).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Failed);
    assert!(!fsm.is_rolling_back());
    assert!(fsm.error().is_none());

    // Still recoverable
    fsm.process(DeploymentEvent::Retry).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Running);
}

#[test]
fn test_fsm_rollback_failure() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::JobFailed("boom".to_string())).unwrap();
    fsm.process(DeploymentEvent::Rollback).unwrap();
    fsm.process(DeploymentEvent::RollbackFailed("rollback boom".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), DeploymentStatus::Failed);
    assert_eq!(fsm.error(), Some("rollback boom"));
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = DeploymentFsm::new();

    // Nothing to retry or roll back from idle
    assert!(fsm.process(DeploymentEvent::Retry).is_err());
    assert!(fsm.process(DeploymentEvent::Rollback).is_err());
    assert!(fsm.process(DeploymentEvent::JobSucceeded { last: false }).is_err());

    // No second start while running
    fsm.process(DeploymentEvent::Start).unwrap();
    assert!(fsm.process(DeploymentEvent::Start).is_err());
    assert_eq!(fsm.state(), DeploymentStatus::Running);
}

#[test]
fn test_fsm_reset_and_interrupt() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.interrupt("restarted");
    assert_eq!(fsm.state(), DeploymentStatus::Failed);
    assert_eq!(fsm.error(), Some("restarted"));

    // Interrupt leaves non-running states alone
    fsm.interrupt("again");
    assert_eq!(fsm.error(), Some("restarted"));

    fsm.process(DeploymentEvent::Reset).unwrap();
    assert_eq!(fsm.state(), DeploymentStatus::Idle);
    assert!(fsm.error().is_none());
}
