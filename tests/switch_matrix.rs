#![cfg(not(feature = "async"))]

mod common;

use common::{event_log, lines_set, matrix_lines, Event, RecordingDelay};
use pl455_balance_rs::{
    errors::Error,
    switch_matrix::{SwitchMatrix, SwitchMatrixConfig},
};

type Result = core::result::Result<(), Error<()>>;

#[test]
fn enables_reference_path_for_cell_one() {
    let log = event_log();
    let mut matrix = SwitchMatrix::new(matrix_lines(&log), SwitchMatrixConfig::default());
    let mut delay = RecordingDelay::default();

    let result: Result = matrix.enable_path(1, &mut delay);
    result.unwrap();

    assert_eq!(lines_set(&log.borrow()), vec![2, 4, 10, 11]);
    assert_eq!(matrix.active_path(), Some(1));
    assert_eq!(delay.total_ms(), 500);
}

#[test]
fn second_path_requires_reset() {
    let log = event_log();
    let mut matrix = SwitchMatrix::new(matrix_lines(&log), SwitchMatrixConfig::default());
    let mut delay = RecordingDelay::default();

    let result: Result = matrix.enable_path(1, &mut delay);
    result.unwrap();
    let events_after_first = log.borrow().len();

    let result: Result = matrix.enable_path(2, &mut delay);
    assert_eq!(result, Err(Error::PathBusy { active: 1 }));
    assert_eq!(log.borrow().len(), events_after_first);

    let result: Result = matrix.reset_all(&mut delay);
    result.unwrap();
    assert_eq!(matrix.active_path(), None);
    let released: Vec<Event> = log.borrow()[events_after_first..].to_vec();
    assert_eq!(released, (1..=11).map(|l| Event::Line(l, false)).collect::<Vec<_>>());

    log.borrow_mut().clear();
    let result: Result = matrix.enable_path(2, &mut delay);
    result.unwrap();
    assert_eq!(lines_set(&log.borrow()), vec![1, 3, 9, 10]);
    assert_eq!(delay.total_ms(), 1500);
}

#[test]
fn every_reference_path_uses_four_lines() {
    let expected: [&[u8]; 6] = [
        &[2, 4, 10, 11],
        &[1, 3, 9, 10],
        &[2, 4, 8, 9],
        &[1, 3, 7, 8],
        &[2, 4, 6, 7],
        &[1, 3, 5, 6],
    ];
    let log = event_log();
    let mut matrix = SwitchMatrix::new(matrix_lines(&log), SwitchMatrixConfig::default());
    let mut delay = RecordingDelay::default();

    for (cell, lines) in (1..=6).zip(expected) {
        log.borrow_mut().clear();
        let result: Result = matrix.enable_path(cell, &mut delay);
        result.unwrap();
        assert_eq!(lines_set(&log.borrow()), lines.to_vec());
        let result: Result = matrix.reset_all(&mut delay);
        result.unwrap();
    }
}

#[test]
fn rejects_cells_without_a_path() {
    let log = event_log();
    let mut matrix = SwitchMatrix::new(matrix_lines(&log), SwitchMatrixConfig::default());
    let mut delay = RecordingDelay::default();

    let result: Result = matrix.enable_path(0, &mut delay);
    assert_eq!(result, Err(Error::InvalidCell(0)));
    let result: Result = matrix.enable_path(7, &mut delay);
    assert_eq!(result, Err(Error::InvalidCell(7)));
    assert!(log.borrow().is_empty());
    assert_eq!(matrix.active_path(), None);
}

#[test]
fn failed_line_keeps_path_active_until_reset() {
    let log = event_log();
    let mut lines = matrix_lines(&log);
    lines[3].fail = true;
    let mut matrix = SwitchMatrix::new(lines, SwitchMatrixConfig::default());
    let mut delay = RecordingDelay::default();

    let result: Result = matrix.enable_path(1, &mut delay);
    assert_eq!(
        result,
        Err(Error::Pin(embedded_hal::digital::ErrorKind::Other))
    );
    assert_eq!(matrix.active_path(), Some(1));

    let result: Result = matrix.reset_all(&mut delay);
    assert!(result.is_err());
    assert_eq!(matrix.active_path(), Some(1));

    let result: Result = matrix.enable_path(2, &mut delay);
    assert_eq!(result, Err(Error::PathBusy { active: 1 }));
}

#[test]
fn custom_path_table() {
    let log = event_log();
    let config = SwitchMatrixConfig::new(&[0b0011, 0b1100], 20).unwrap();
    let mut matrix = SwitchMatrix::new(matrix_lines(&log), config);
    let mut delay = RecordingDelay::default();

    assert_eq!(matrix.cells(), 2);
    let result: Result = matrix.enable_path(2, &mut delay);
    result.unwrap();
    assert_eq!(lines_set(&log.borrow()), vec![3, 4]);
    assert_eq!(delay.total_ms(), 20);
}
