use super::*;

fn ramp(start: i16, len: usize) -> Vec<i16> {
    (0..len).map(|i| start.wrapping_add(i as i16)).collect()
}

fn write_tone(path: &Path, frames: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: MIC_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        writer.write_sample(i as i16).unwrap();
    }
    writer.finalize().unwrap();
}

// ========================================================================
// RING BUFFER
// ========================================================================

#[test]
fn ring_returns_samples_in_order() {
    let mut ring = MicRingBuffer::new();
    let input = ramp(0, 1000);
    assert_eq!(ring.write(&input), 1000);

    let mut out = vec![0; 1000];
    assert_eq!(ring.read(&mut out), 1000);
    assert_eq!(out, input);
    assert!(ring.is_empty());
}

#[test]
fn ring_preserves_order_across_wraparound() {
    let mut ring = MicRingBuffer::new();
    let mut scratch = vec![0; 3000];
    ring.write(&ramp(0, 3000));
    ring.read(&mut scratch);

    // Write cursor is now 3000 into a 4096-sample ring.
    let input = ramp(100, 2500);
    assert_eq!(ring.write(&input), 2500);
    assert_eq!(ring.len(), 2500);

    let mut out = vec![0; 2500];
    assert_eq!(ring.read(&mut out), 2500);
    assert_eq!(out, input);
}

#[test]
fn ring_truncates_writes_to_free_space() {
    let mut ring = MicRingBuffer::new();
    assert_eq!(ring.write(&ramp(0, 4000)), 4000);
    assert_eq!(ring.write(&ramp(0, 200)), MIC_RING_CAPACITY - 4000);
    assert_eq!(ring.len(), ring.capacity());

    let mut out = vec![0; 4000];
    ring.read(&mut out);
    assert_eq!(out, ramp(0, 4000));
}

// ========================================================================
// FRAME SOURCES
// ========================================================================

#[test]
fn silence_mode_produces_null_frames() {
    let mic = MicInput::new(MicInputMode::Silence, None);
    let mut frame = [7; MIC_FRAME_LEN];
    assert!(!mic.fill_frame(true, &mut frame));
    assert_eq!(frame, [7; MIC_FRAME_LEN]);
}

#[test]
fn external_capture_reads_one_frame_at_a_time() {
    let mic = MicInput::new(MicInputMode::External, None);
    mic.push_capture(&ramp(0, 1000));

    let mut frame = [0; MIC_FRAME_LEN];
    assert!(mic.fill_frame(false, &mut frame));
    assert_eq!(frame[..], ramp(0, MIC_FRAME_LEN)[..]);
    assert_eq!(mic.buffered(), 1000 - MIC_FRAME_LEN);
}

#[test]
fn short_capture_pads_with_last_sample() {
    let mic = MicInput::new(MicInputMode::External, None);
    mic.push_capture(&ramp(10, 100));

    let mut frame = [0; MIC_FRAME_LEN];
    assert!(mic.fill_frame(false, &mut frame));
    assert_eq!(frame[..100], ramp(10, 100)[..]);
    assert!(frame[100..].iter().all(|&s| s == 109));
    assert_eq!(mic.buffered(), 0);
}

#[test]
fn empty_capture_produces_zero_frame() {
    let mic = MicInput::new(MicInputMode::External, None);
    let mut frame = [5; MIC_FRAME_LEN];
    assert!(mic.fill_frame(false, &mut frame));
    assert_eq!(frame, [0; MIC_FRAME_LEN]);
}

#[test]
fn capture_is_ignored_outside_external_mode() {
    let mic = MicInput::new(MicInputMode::Noise, None);
    assert_eq!(mic.push_capture(&ramp(0, 100)), 0);
    assert_eq!(mic.buffered(), 0);
}

#[test]
fn noise_is_live_only_while_hotkey_held() {
    let mic = MicInput::new(MicInputMode::Noise, None);
    let mut frame = [0; MIC_FRAME_LEN];
    assert!(!mic.fill_frame(false, &mut frame));

    assert!(mic.fill_frame(true, &mut frame));
    assert!(frame.iter().any(|&s| s != 0));
}

#[test]
fn wav_loops_through_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blow.wav");
    write_tone(&path, 1000);

    let mic = MicInput::new(MicInputMode::Wav, Some(&path));
    let mut frame = [0; MIC_FRAME_LEN];

    assert!(!mic.fill_frame(false, &mut frame));

    assert!(mic.fill_frame(true, &mut frame));
    assert_eq!(frame[..], ramp(0, MIC_FRAME_LEN)[..]);

    assert!(mic.fill_frame(true, &mut frame));
    assert_eq!(frame[0], MIC_FRAME_LEN as i16);
    assert_eq!(frame[1000 - MIC_FRAME_LEN - 1], 999);
    assert_eq!(frame[1000 - MIC_FRAME_LEN], 0);
}

#[test]
fn releasing_hotkey_rewinds_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blow.wav");
    write_tone(&path, 2000);

    let mic = MicInput::new(MicInputMode::Wav, Some(&path));
    let mut frame = [0; MIC_FRAME_LEN];
    mic.fill_frame(true, &mut frame);
    mic.fill_frame(false, &mut frame);

    assert!(mic.fill_frame(true, &mut frame));
    assert_eq!(frame[0], 0);
}

#[test]
fn unreadable_wav_produces_null_frames() {
    let dir = tempfile::tempdir().unwrap();
    let mic = MicInput::new(MicInputMode::Wav, Some(&dir.path().join("missing.wav")));
    let mut frame = [0; MIC_FRAME_LEN];
    assert!(!mic.fill_frame(true, &mut frame));
}

#[test]
fn reconfigure_discards_buffered_capture() {
    let mic = MicInput::new(MicInputMode::External, None);
    mic.push_capture(&ramp(0, 500));
    mic.reconfigure(MicInputMode::External, None);
    assert_eq!(mic.buffered(), 0);
    assert_eq!(mic.mode(), MicInputMode::External);
}
