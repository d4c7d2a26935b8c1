//! End-to-end tests for the analysis pipeline.

use chord_core::{
    AnalyzerSettings, ChordAnalyzer, ChordSegment, ConstantQTransform, CqtConfig, KeyEstimate,
    KeyEstimator, Mode, NoteEvent, SegmentAssembler, SpectralKernelBank,
};
use pretty_assertions::assert_eq;
use std::f32::consts::PI;
use std::sync::Arc;
use std::thread;

const SAMPLE_RATE: f32 = 44100.0;

fn tones(freqs: &[f32], seconds: f32) -> Vec<f32> {
    let len = (seconds * SAMPLE_RATE) as usize;
    (0..len)
        .map(|n| {
            freqs
                .iter()
                .map(|f| (2.0 * PI * f * n as f32 / SAMPLE_RATE).sin())
                .sum::<f32>()
                / freqs.len() as f32
        })
        .collect()
}

/// Deterministic pseudo-random samples in [-1, 1].
fn noise(len: usize, seed: u64) -> Vec<f32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as f32 / (1u64 << 31) as f32) * 2.0 - 1.0
        })
        .collect()
}

fn note(onset: f64, offset: f64, pitch: u8) -> NoteEvent {
    NoteEvent {
        onset,
        offset,
        pitch,
        confidence: 0.9,
    }
}

#[test]
fn zero_frames_give_zero_chroma_for_several_configs() {
    for (fft_size, bins_per_octave, min_frequency) in
        [(2048, 12, 82.41), (4096, 24, 55.0), (1024, 36, 130.81)]
    {
        let config = CqtConfig {
            fft_size,
            bins_per_octave,
            min_frequency,
            ..CqtConfig::default()
        };
        let cqt = ConstantQTransform::from_config(&config).unwrap();
        let chroma = cqt.process(&vec![0.0; fft_size]).unwrap();
        assert!(chroma.is_silent());
    }
}

#[test]
fn chroma_is_normalized_whenever_energy_is_present() {
    let cqt = ConstantQTransform::from_config(&CqtConfig::default()).unwrap();
    for seed in 1..6 {
        let chroma = cqt.process(&noise(2048, seed)).unwrap();
        assert!(chroma.values().iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(chroma.values().iter().any(|&v| v == 1.0));
    }
}

#[test]
fn kernel_bank_is_shared_across_threads() {
    let bank = Arc::new(SpectralKernelBank::new(&CqtConfig::default()).unwrap());
    let frame = tones(&[440.0], 2048.0 / SAMPLE_RATE);
    let expected = ConstantQTransform::new(bank.clone()).process(&frame).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cqt = ConstantQTransform::new(bank.clone());
            let frame = frame.clone();
            thread::spawn(move || cqt.process(&frame).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn synthesized_progression_is_recognized() {
    let mut settings = AnalyzerSettings::default();
    // Adjacent-semitone leakage sits around half the peak; keep only clear tones.
    settings.assembler.min_observation_confidence = 0.7;
    let analyzer = ChordAnalyzer::new(settings).unwrap();

    // C5 E5 G5, then A4 C5 E5
    let mut samples = tones(&[523.25, 659.26, 783.99], 3.0);
    samples.extend(tones(&[440.0, 523.25, 659.26], 3.0));

    let report = analyzer.analyze_samples(&samples);
    let first = report.segments.first().expect("at least one segment");
    let last = report.segments.last().expect("at least one segment");
    assert_eq!(first.name, "C major");
    assert_eq!(last.name, "A minor");
    assert!(first.start < 0.05);
    assert!(report.segments.windows(2).all(|w| w[0].end <= w[1].start));
    assert!(matches!(report.key, KeyEstimate::Estimated(_)));
}

#[test]
fn transcribed_notes_become_segments_and_key() {
    let analyzer = ChordAnalyzer::new(AnalyzerSettings::default()).unwrap();
    let mut notes = Vec::new();
    // C major (C4 E4 G4), F major (F3 A3 C4), G7 (G3 B3 D4 F4), C major
    for (start, pitches) in [
        (0.0, &[60, 64, 67][..]),
        (4.0, &[53, 57, 60][..]),
        (8.0, &[55, 59, 62, 65][..]),
        (12.0, &[60, 64, 67][..]),
    ] {
        for &pitch in pitches {
            notes.push(note(start, start + 4.0, pitch));
        }
    }

    let report = analyzer.analyze_notes(&notes).unwrap();
    let names: Vec<&str> = report.segments.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names.first(), Some(&"C major"));
    assert!(names.contains(&"F major"));
    assert!(names.contains(&"G7"));
    assert_eq!(names.last(), Some(&"C major"));

    let key = report.key.key().expect("a key");
    assert_eq!((key.tonic, key.mode), (0, Mode::Major));
}

#[test]
fn empty_note_list_gives_empty_report() {
    let analyzer = ChordAnalyzer::new(AnalyzerSettings::default()).unwrap();
    let report = analyzer.analyze_notes(&[]).unwrap();
    assert!(report.segments.is_empty());
    assert_eq!(report.key, KeyEstimate::Unknown);
    assert_eq!(report.key.to_string(), "Unknown");
}

#[test]
fn reanalysis_is_deterministic() {
    let assembler = SegmentAssembler::default();
    let notes: Vec<NoteEvent> = [57, 60, 64]
        .iter()
        .map(|&p| note(0.0, 5.0, p))
        .collect();
    let first = assembler.assemble_notes(&notes).unwrap();
    assert_eq!(first, assembler.assemble_notes(&notes).unwrap());
    assert_eq!(first[0].name, "A minor");
}

#[test]
fn c_major_segments_estimate_c_major() {
    let segments: Vec<ChordSegment> = (0..4)
        .map(|i| ChordSegment::new(i as f64, i as f64 + 1.0, "C major", 0.9, [0, 4, 7]))
        .collect();
    let estimate = KeyEstimator::new().estimate(&segments);
    let key = estimate.key().unwrap();
    assert_eq!(key.tonic, 0);
    assert_eq!(key.mode, Mode::Major);
}

#[test]
fn report_serializes_to_wire_format() {
    let analyzer = ChordAnalyzer::new(AnalyzerSettings::default()).unwrap();
    let notes: Vec<NoteEvent> = [60, 64, 67].iter().map(|&p| note(0.0, 2.0, p)).collect();
    let report = analyzer.analyze_notes(&notes).unwrap();
    let json = serde_json::to_value(&report).unwrap();

    let chord = &json["chords"][0];
    assert_eq!(chord["chord"], "C major");
    assert_eq!(chord["onset"], 0.0);
    assert_eq!(chord["pitch_classes"], serde_json::json!([0, 4, 7]));
    assert_eq!(json["key"]["status"], "estimated");
    assert_eq!(json["key"]["key"], "C");
    assert_eq!(json["key"]["mode"], "major");
}

#[test]
fn wire_format_notes_deserialize() {
    let notes: Vec<NoteEvent> = serde_json::from_str(
        r#"[{"onset": 0.0, "offset": 0.5, "pitch": 60, "confidence": 0.8}]"#,
    )
    .unwrap();
    assert_eq!(notes, vec![NoteEvent { onset: 0.0, offset: 0.5, pitch: 60, confidence: 0.8 }]);
}
