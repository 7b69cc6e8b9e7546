// End-to-end checks across config loading, clock trees, grammar rendering,
// clocks and MIDI export.

use clockwork_music::clock::{Clock, ClockLine};
use clockwork_music::composition::compose;
use clockwork_music::config::CompositionConfig;
use clockwork_music::duration::Duration;
use clockwork_music::event::Event;
use clockwork_music::midi::write_midi;
use clockwork_music::modal::{
    ModalEvent, ModalItem, PitchDrone, PlacementMaker, apply_clock_trees, modal_sequence_to_clock_line,
};

const PIECE: &str = r#"{
    "seed": 7,
    "cycles": 3,
    "tempo_bpm": 120,
    "layers": [
        { "id": "bar", "events": [{ "pitch": 36, "duration": "2" }] },
        { "id": "run", "parent": "bar", "event_picker": "choice",
          "events": [{ "pitch": 60, "duration": "1/3" }, { "pitch": 64, "duration": "1/3" }],
          "event_count": [1, 4], "count_picker": "choice" },
        { "id": "hit", "parent": "bar", "events": [{ "duration": "1/2" }] },
        { "id": "grace", "parent": "run", "events": [{ "pitch": 72, "duration": "1/6" }] }
    ],
    "grammar": {
        "terminals": [
            { "name": "a", "notes": [{ "pitch": 67, "duration": "1" }] },
            { "name": "b", "notes": [{ "pitch": 69, "duration": "1/2" }] }
        ],
        "symbolic": ["motif"],
        "rules": [
            { "left": "motif", "right": ["a"] },
            { "left": "a", "right": ["a", "b"], "weight": 2 },
            { "left": "b", "right": ["b", "b"], "weight": 0.5 }
        ],
        "sequence": [{ "symbol": "motif", "range": ["2", "2"] }, { "symbol": "motif" }],
        "limit": 3
    }
}"#;

#[test]
fn control_timelines_stay_in_sync_with_content() {
    let config = CompositionConfig::from_json(PIECE).unwrap();
    let composition = compose(&config).unwrap();
    let total = composition.clock.duration();
    assert!(total.is_positive());
    assert_eq!(composition.clock.control.len(), 4);
    for timeline in &composition.clock.control.events {
        assert_eq!(timeline.duration(), total, "timeline {:?}", timeline.tag());
    }
    // Thirds and sixths stay exact across the whole run.
    let summed: Duration = composition.clock.content.events.iter().map(Event::duration).sum();
    assert_eq!(summed, total);
}

#[test]
fn grammar_target_range_is_met_exactly() {
    let config = CompositionConfig::from_json(PIECE).unwrap();
    let composition = compose(&config).unwrap();
    assert_eq!(composition.grammar.len(), 2);
    // Only "a b b" (1 + 1/2 + 1/2) lasts exactly two beats within three layers.
    assert_eq!(composition.grammar[0].duration(), Duration::from_integer(2));
}

#[test]
fn same_config_same_piece() {
    let config = CompositionConfig::from_json(PIECE).unwrap();
    let a = compose(&config).unwrap();
    let b = compose(&config).unwrap();
    assert_eq!(a, b);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn config_loads_from_disk_and_exports_midi() {
    let dir = std::env::temp_dir().join(format!("clockwork-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let config_path = dir.join("piece.json");
    std::fs::write(&config_path, PIECE).unwrap();

    let config = CompositionConfig::load(&config_path).unwrap();
    assert_eq!(config.seed, 7);
    let composition = compose(&config).unwrap();

    let midi_path = dir.join("piece.mid");
    write_midi(&composition.to_simultaneous(), config.tempo_bpm, &midi_path).unwrap();
    let bytes = std::fs::read(&midi_path).unwrap();
    assert_eq!(&bytes[..4], b"MThd");

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn modal_sequence_becomes_a_repeating_clock() {
    let config = CompositionConfig::from_json(PIECE).unwrap();
    let mut sequence = vec![
        ModalItem::Modal(ModalEvent::new(60, 62, 1)),
        ModalItem::rest(Duration::from_integer(1)),
        ModalItem::Modal(ModalEvent::new(62, 67, 2)),
    ];
    apply_clock_trees(&mut sequence, &mut |_: &ModalEvent| {
        config.build_clock_tree().map_err(|e| match e {
            clockwork_music::error::ConfigError::Clock(e) => e,
            _ => clockwork_music::error::ClockError::EmptyTree,
        })
    })
    .unwrap();

    let mut makers: Vec<Box<dyn PlacementMaker>> = vec![Box::new(PitchDrone::new("drone"))];
    let main: ClockLine = modal_sequence_to_clock_line(&sequence, &mut makers).unwrap();
    let clock = Clock::new(main.clone());
    assert_eq!(clock.duration(), main.duration());

    let flat = clock.to_simultaneous(2);
    assert_eq!(flat.duration(), main.duration() * 2);
    assert!(flat.get_tagged("clock").is_some());
    assert!(flat.get_tagged("drone").is_some());
}
