use clipsift_decoder::{Backend, Configuration, MockOptions, ReadOutcome};

#[test]
fn mock_backend_reads_until_end_of_stream() {
    let config = Configuration {
        backend: Backend::Mock,
        input: None,
        mock: MockOptions::with_frames(5),
    };
    let mut reader = config.create_reader().expect("mock reader should open");
    assert_eq!(reader.backend(), "mock");
    assert_eq!(reader.total_frames(), Some(5));

    let mut frames = 0;
    loop {
        match reader.read_frame().expect("mock reads never fail") {
            ReadOutcome::Frame(frame) => {
                assert_eq!(frame.channels(), 3);
                frames += 1;
            }
            ReadOutcome::Unreadable { reason } => panic!("unexpected skip: {reason}"),
            ReadOutcome::EndOfStream => break,
        }
    }
    assert_eq!(frames, 5);
}

#[test]
fn declared_frames_override_metadata_only() {
    let mut options = MockOptions::with_frames(4);
    options.declared_frames = Some(10);
    let config = Configuration {
        backend: Backend::Mock,
        input: None,
        mock: options,
    };
    let reader = config.create_reader().unwrap();
    let metadata = reader.metadata();
    assert_eq!(metadata.total_frames, Some(10));
    assert_eq!(metadata.fps, Some(25.0));
}
