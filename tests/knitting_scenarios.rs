//! # Knitting Scenarios
//!
//! End-to-end checks through the public API: pattern computation, row
//! selection, the wire codec, and a full session against the simulated
//! machine.

use knitstream::{
    Bitmap, ConnectionSession, MachineConfig,
    knitting::{CarriageSide, KnittingState},
    pattern::{Alignment, PatternConfig, compute_pattern, select_row, transform},
    protocol::commands::{pack_row, set_row, unpack_row},
    session::{Controller, SessionEvent},
    transport::SimulatedMachine,
};
use pretty_assertions::assert_eq;
use rand::Rng;
use std::time::Duration;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// 2x2 checker: row 0 = [0,1], row 1 = [1,0].
fn checker() -> Bitmap {
    Bitmap::from_rows(&[&[0, 1], &[1, 0]])
}

fn left_aligned() -> PatternConfig {
    PatternConfig {
        alignment: Alignment::Left,
        repeat_horizontal: true,
        repeat_vertical: true,
        height_from_tile: true,
        end_needle_selection: false,
        ..Default::default()
    }
}

fn cams(left: i32, right: i32) -> KnittingState {
    KnittingState {
        point_cams: [left, right],
        ..Default::default()
    }
}

fn random_bitmap(rng: &mut impl Rng, max_w: usize, max_h: usize) -> Bitmap {
    let width = rng.random_range(1..=max_w);
    let height = rng.random_range(1..=max_h);
    let mut b = Bitmap::new(width, height, knitstream::bitmap::NEEDLE_PALETTE.to_vec());
    for y in 0..height {
        for x in 0..width {
            b.set(x, y, rng.random_range(0..=1));
        }
    }
    b
}

// ============================================================================
// PATTERN SCENARIOS
// ============================================================================

#[test]
fn test_checker_across_six_needles() {
    let pattern = compute_pattern(&checker(), &left_aligned(), &cams(0, 6));
    assert_eq!((pattern.width, pattern.height), (6, 2));
    assert_eq!(pattern.row(0).unwrap(), &[0, 1, 0, 1, 0, 1]);
    assert_eq!(pattern.row(1).unwrap(), &[1, 0, 1, 0, 1, 0]);
}

#[test]
fn test_checker_negative() {
    let config = PatternConfig {
        negative: true,
        ..left_aligned()
    };
    let pattern = compute_pattern(&checker(), &config, &cams(0, 6));
    assert_eq!(pattern.row(0).unwrap(), &[1, 0, 1, 0, 1, 0]);
}

#[test]
fn test_no_op_config_reproduces_tile() {
    let mut rng = rand::rng();
    for _ in 0..20 {
        let tile = random_bitmap(&mut rng, 12, 8);
        let state = cams(0, tile.width as i32);
        let pattern = compute_pattern(&tile, &left_aligned(), &state);
        assert_eq!(pattern.data, tile.data);
        assert_eq!((pattern.width, pattern.height), (tile.width, tile.height));
    }
}

#[test]
fn test_end_needles_always_selected() {
    let mut rng = rand::rng();
    let config = PatternConfig {
        end_needle_selection: true,
        alignment: Alignment::Center,
        ..Default::default()
    };
    for _ in 0..20 {
        let tile = random_bitmap(&mut rng, 7, 5);
        let left = rng.random_range(-50..0);
        let right = rng.random_range(2..50);
        let pattern = compute_pattern(&tile, &config, &cams(left, right));
        for y in 0..pattern.height {
            let row = pattern.row(y).unwrap();
            assert_eq!(row[0], 1);
            assert_eq!(row[row.len() - 1], 1);
        }
    }
}

#[test]
fn test_mirror_horizontal_symmetry() {
    let mut rng = rand::rng();
    let tile = random_bitmap(&mut rng, 9, 4);
    let m = transform::mirror_horizontal(&tile);
    assert_eq!((m.width, m.height), (2 * tile.width, tile.height));
    for y in 0..m.height {
        for x in 0..m.width {
            assert_eq!(m.get(x, y), m.get(m.width - 1 - x, y));
        }
    }
}

#[test]
fn test_left_row_is_right_row_reversed() {
    let pattern = compute_pattern(&checker(), &left_aligned(), &cams(0, 7));
    for r in 0..pattern.height {
        let mut right = select_row(&pattern, r, CarriageSide::Right).unwrap();
        right.reverse();
        assert_eq!(select_row(&pattern, r, CarriageSide::Left).unwrap(), right);
    }
}

#[test]
fn test_designer_config_json_loads() {
    let json = r#"{
        "negative": true,
        "alignment": "right",
        "endNeedleSelection": true,
        "marginLeft": 2,
        "heightFromTile": false,
        "height": 6
    }"#;
    let config = PatternConfig::from_json(json).unwrap();
    assert!(config.negative);
    assert_eq!(config.alignment, Alignment::Right);
    assert!(config.end_needle_selection);
    assert_eq!(config.margin_left, 2);
    assert_eq!(config.height, 6);
    assert!(config.repeat_horizontal);

    let pattern = compute_pattern(&checker(), &config, &cams(-10, 10));
    assert_eq!((pattern.width, pattern.height), (20, 6));
    assert_eq!(&pattern.row(0).unwrap()[..2], &[0, 0]);
}

// ============================================================================
// WIRE CODEC
// ============================================================================

#[test]
fn test_row_frame_bytes() {
    assert_eq!(set_row(&[1, 0, 1, 1]).unwrap(), vec![0x02, 0x04, 0x0D]);
}

#[test]
fn test_pack_unpack_random_rows() {
    let mut rng = rand::rng();
    for _ in 0..50 {
        let len: usize = rng.random_range(0..=200);
        let row: Vec<u8> = (0..len).map(|_| rng.random_range(0..=1)).collect();
        let packed = pack_row(&row).unwrap();
        assert_eq!(packed.len(), len.div_ceil(8));
        assert_eq!(unpack_row(len, &packed).unwrap(), row);
    }
    assert!(pack_row(&[0; 201]).is_err());
}

// ============================================================================
// SESSION AGAINST THE SIMULATED MACHINE
// ============================================================================

#[tokio::test]
async fn test_simulated_machine_knits_three_rows() {
    let controller = Controller::new(checker(), left_aligned(), cams(0, 6));
    let session = ConnectionSession::new(controller, MachineConfig::SK840);
    let mut events = session.subscribe();

    // Passes must outlast the settle delay or the next exit is ignored.
    let mut sim = SimulatedMachine::new(Duration::from_millis(80), Some(3));
    session.connect(&mut sim).await.unwrap();
    session.start_patterning().await.unwrap();

    let mut sent = Vec::new();
    while sent.len() < 4 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let SessionEvent::RowSent(row) = event {
            sent.push(row);
        }
    }

    let rows: Vec<usize> = sent.iter().map(|r| r.row_number).collect();
    assert_eq!(rows, vec![0, 1, 0, 1]);
    let sides: Vec<CarriageSide> = sent.iter().map(|r| r.side).collect();
    assert_eq!(
        sides,
        vec![
            CarriageSide::Left,
            CarriageSide::Right,
            CarriageSide::Left,
            CarriageSide::Right
        ]
    );

    let state = session
        .with_controller(|c| c.knitting_state().clone())
        .await;
    assert_eq!(state.total_rows, 3);

    session.disconnect().await;
    assert!(!session.is_connected());
}
