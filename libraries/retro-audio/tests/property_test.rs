//! Property-based tests for the equalizer and spectrum analyzer
//!
//! Uses proptest to check bounds that must hold for every gain setting and
//! every input signal.

use proptest::prelude::*;
use retro_audio::equalizer::{MAX_GAIN_DB, MIN_GAIN_DB};
use retro_audio::{
    Equalizer, EqualizerControl, EqualizerState, SpectrumAnalyzer, SpectrumConfig, StreamSpec,
};
use std::f32::consts::PI;
use std::time::Duration;

fn gain() -> impl Strategy<Value = f32> {
    MIN_GAIN_DB..=MAX_GAIN_DB
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Output stays inside [-1, 1] for every in-range gain and any input
    #[test]
    fn equalizer_output_is_bounded(
        bass in gain(),
        mid in gain(),
        treble in gain(),
        input in prop::collection::vec(-1.0f32..=1.0, 2..4096),
    ) {
        let control = EqualizerControl::new(EqualizerState::new(bass, mid, treble));
        let mut eq = Equalizer::new(control, 44_100, 2);

        let mut buffer = input;
        if buffer.len() % 2 == 1 {
            buffer.pop();
        }
        eq.process_frame(&mut buffer);

        for s in &buffer {
            prop_assert!(s.is_finite());
            prop_assert!((-1.0..=1.0).contains(s));
        }
    }

    /// Arbitrary floats, including NaN and infinities, become valid gains
    #[test]
    fn any_gain_is_sanitized(bass in any::<f32>(), mid in any::<f32>(), treble in any::<f32>()) {
        let state = EqualizerState::new(bass, mid, treble);
        for g in [state.bass, state.mid, state.treble] {
            prop_assert!((MIN_GAIN_DB..=MAX_GAIN_DB).contains(&g));
        }
    }

    /// Gain updates published mid-stream never push output out of range
    #[test]
    fn retuning_between_frames_stays_bounded(
        settings in prop::collection::vec((gain(), gain(), gain()), 1..8),
        freq in 40.0f32..15_000.0,
    ) {
        let control = EqualizerControl::default();
        let mut eq = Equalizer::new(control.clone(), 48_000, 2);

        let mut phase = 0usize;
        for (bass, mid, treble) in settings {
            control.set(EqualizerState::new(bass, mid, treble));
            let mut frame: Vec<f32> = (0..1024)
                .flat_map(|i| {
                    let s = (2.0 * PI * freq * (phase + i) as f32 / 48_000.0).sin() * 0.9;
                    [s, s]
                })
                .collect();
            phase += 1024;

            eq.process_frame(&mut frame);
            prop_assert!(frame.iter().all(|s| (-1.0..=1.0).contains(s)));
        }
    }

    /// Bars are in [0, 1] and move at most `1 - decay` per update for a
    /// constant tone
    #[test]
    fn spectrum_bars_are_bounded_and_smoothed(
        freq in 50.0f32..15_000.0,
        amplitude in 0.0f32..=1.0,
        decay in 0.0f32..0.95,
    ) {
        let config = SpectrumConfig { decay, ..Default::default() };
        let max_step = config.max_step();
        let mut analyzer = SpectrumAnalyzer::new(config, StreamSpec::cd()).unwrap();

        let mut previous = vec![0.0f32; analyzer.config().bars];
        for update in 0..12 {
            let chunk: Vec<f32> = (0..1470)
                .flat_map(|i| {
                    let n = update * 1470 + i;
                    let s = (2.0 * PI * freq * n as f32 / 44_100.0).sin() * amplitude;
                    [s, s]
                })
                .collect();
            analyzer.push_interleaved(&chunk, 2);
            let snapshot = analyzer.analyze(Duration::from_secs_f64(update as f64 / 30.0));

            for (now, before) in snapshot.bars.iter().zip(&previous) {
                prop_assert!(*now >= 0.0 && *now <= 1.0);
                prop_assert!((now - before).abs() <= max_step + 1e-5);
            }
            previous = snapshot.bars;
        }
    }
}
