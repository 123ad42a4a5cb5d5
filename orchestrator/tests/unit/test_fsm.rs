//! FSM unit tests

use ddorch::jobs::fsm::{JobEvent, JobFsm};
use ddorch::models::job::JobStatus;

#[test]
fn test_fsm_initial_state() {
    let fsm = JobFsm::new();
    assert_eq!(fsm.state(), JobStatus::Queued);
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = JobFsm::new();

    // Queued -> Running
    fsm.process(JobEvent::Start).unwrap();
    assert_eq!(fsm.state(), JobStatus::Running);

    // Running -> Completed
    fsm.process(JobEvent::Finish).unwrap();
    assert_eq!(fsm.state(), JobStatus::Completed);
    assert!(fsm.state().is_terminal());
}

#[test]
fn test_fsm_failure_flow() {
    let mut fsm = JobFsm::new();

    fsm.process(JobEvent::Start).unwrap();
    fsm.process(JobEvent::Fail("test error".to_string())).unwrap();

    assert_eq!(fsm.state(), JobStatus::Failed);
    assert_eq!(fsm.error(), Some("test error"));
}

#[test]
fn test_fsm_terminal_states_are_final() {
    for status in [JobStatus::Completed, JobStatus::Failed] {
        let mut fsm = JobFsm::from_status(status);
        assert!(fsm.process(JobEvent::Start).is_err());
        assert!(fsm.process(JobEvent::Finish).is_err());
        assert!(fsm.process(JobEvent::Fail("late".to_string())).is_err());
        assert_eq!(fsm.state(), status);
    }
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = JobFsm::new();

    // Cannot finish without starting
    let result = fsm.process(JobEvent::Finish);
    assert!(result.is_err());
    assert_eq!(fsm.state(), JobStatus::Queued);
}

#[test]
fn test_predecessors() {
    assert!(JobFsm::predecessors(JobStatus::Queued).is_empty());
    assert_eq!(JobFsm::predecessors(JobStatus::Running), &[JobStatus::Queued]);
    assert_eq!(JobFsm::predecessors(JobStatus::Completed), &[JobStatus::Running]);
    assert_eq!(JobFsm::predecessors(JobStatus::Failed), &[JobStatus::Running]);
}
