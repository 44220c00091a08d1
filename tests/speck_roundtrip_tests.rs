use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sperr_speck::speck::{decode_coefficients, encode_coefficients};
use sperr_speck::{BitStream, Dims, EncoderParams, SperrError, StopCondition};

fn random_integers(rng: &mut StdRng, len: usize, range: i32) -> Vec<f64> {
    (0..len)
        .map(|_| {
            // mostly small values with a few large ones, like wavelet coefficients
            if rng.gen_bool(0.1) {
                rng.gen_range(-range..=range) as f64
            } else {
                rng.gen_range(-8..=8) as f64
            }
        })
        .collect()
}

fn max_abs_error(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Integer-valued arrays of every dimensionality survive a lossless round trip
#[test]
fn test_lossless_roundtrip_shapes() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let shapes = [
        Dims::new_1d(1),
        Dims::new_1d(7),
        Dims::new_1d(1000),
        Dims::new_2d(4, 4),
        Dims::new_2d(31, 17),
        Dims::new_2d(64, 64),
        Dims::new_3d(9, 10, 11),
        Dims::new_3d(16, 16, 16),
        Dims::new_3d(40, 3, 2),
    ];
    for dims in shapes {
        let coeffs = random_integers(&mut rng, dims.len(), 5000);
        let mut stream = BitStream::new();
        let info = encode_coefficients(&coeffs, dims, StopCondition::Lossless, &mut stream)
            .expect("encode failed");
        let rec = decode_coefficients(&info, &mut stream, None).expect("decode failed");
        assert_eq!(rec.coeffs, coeffs, "dims {:?}", dims);
        assert_eq!(rec.bits_read, info.num_bits);
    }
}

/// A single peak in an empty 4x4 array
#[test]
fn test_single_peak_4x4() {
    let mut coeffs = vec![0.0; 16];
    coeffs[0] = 117.0;
    let mut stream = BitStream::new();
    let info = encode_coefficients(&coeffs, Dims::new_2d(4, 4), StopCondition::Lossless, &mut stream)
        .unwrap();
    assert_eq!(info.max_coefficient_bits, 6);

    let rec = decode_coefficients(&info, &mut stream, None).unwrap();
    assert_eq!(rec.coeffs[0], 117.0);
    assert!(rec.coeffs[1..].iter().all(|&c| c == 0.0));
    // far fewer bits than 16 values times 7 bitplanes
    assert!(info.num_bits < 16 * 7);
}

/// Decoding a prefix of the full stream matches decoding a stream that only
/// contains that prefix, and matches an encode run with that budget.
#[test]
fn test_embedded_prefix_property() {
    let mut rng = StdRng::seed_from_u64(11);
    let dims = Dims::new_2d(45, 30);
    let coeffs = random_integers(&mut rng, dims.len(), 2000);

    let mut full = BitStream::new();
    let info = encode_coefficients(&coeffs, dims, StopCondition::Lossless, &mut full).unwrap();

    for b1 in [1, 17, 64, 500, 2049, info.num_bits / 2] {
        if b1 >= info.num_bits {
            continue;
        }
        let from_full = decode_coefficients(&info, &mut full, Some(b1)).unwrap();
        assert_eq!(from_full.bits_read, b1);

        let prefix = full.get_bitstream(b1);
        let mut truncated = BitStream::new();
        truncated.parse_bitstream(&prefix, b1).unwrap();
        let from_prefix = decode_coefficients(&info, &mut truncated, Some(b1)).unwrap();
        assert_eq!(from_full, from_prefix, "budget {}", b1);

        let mut budgeted = BitStream::new();
        let params = EncoderParams::with_bit_budget(b1);
        let short_info =
            encode_coefficients(&coeffs, dims, params.stop_condition().unwrap(), &mut budgeted)
                .unwrap();
        assert_eq!(short_info.num_bits, b1);
        assert_eq!(budgeted.get_bitstream(b1), prefix);
    }
}

/// Max absolute error never grows as the budget grows
#[test]
fn test_error_is_monotone_in_budget() {
    let mut rng = StdRng::seed_from_u64(99);
    let dims = Dims::new_3d(12, 13, 5);
    let coeffs: Vec<f64> = (0..dims.len()).map(|_| rng.gen_range(-300.0..300.0)).collect();

    let mut stream = BitStream::new();
    let info = encode_coefficients(&coeffs, dims, StopCondition::Lossless, &mut stream).unwrap();

    let mut previous = f64::INFINITY;
    let mut budget = 8;
    while budget < info.num_bits {
        let rec = decode_coefficients(&info, &mut stream, Some(budget)).unwrap();
        let err = max_abs_error(&coeffs, &rec.coeffs);
        assert!(err <= previous, "budget {} error {} > {}", budget, err, previous);
        previous = err;
        budget = budget * 3 / 2;
    }
    let rec = decode_coefficients(&info, &mut stream, None).unwrap();
    assert_eq!(rec.coeffs, coeffs);
}

/// Arbitrary reals, including arrays that never reach bitplane 0, decode exactly
#[test]
fn test_lossless_real_values() {
    let mut rng = StdRng::seed_from_u64(7);
    for (dims, scale) in [
        (Dims::new_1d(50), 1.0e-3),
        (Dims::new_2d(9, 9), 0.9),
        (Dims::new_3d(8, 8, 3), 1.0e4),
    ] {
        let coeffs: Vec<f64> = (0..dims.len())
            .map(|_| rng.gen_range(-1.0..1.0) * scale)
            .collect();
        let mut stream = BitStream::new();
        let info = encode_coefficients(&coeffs, dims, StopCondition::Lossless, &mut stream)
            .expect("encode failed");
        let rec = decode_coefficients(&info, &mut stream, None).expect("decode failed");
        assert_eq!(rec.coeffs, coeffs, "dims {:?}", dims);
        assert_eq!(rec.bits_read, info.num_bits);
    }
}

/// Reusing one stream for several encodes does not leak earlier content
#[test]
fn test_stream_reuse() {
    let mut stream = BitStream::new();
    let big: Vec<f64> = (0..256).map(|i| (i * 13 % 97) as f64).collect();
    encode_coefficients(&big, Dims::new_2d(16, 16), StopCondition::Lossless, &mut stream).unwrap();

    let small = vec![3.0, -1.0, 0.0, 2.0];
    let info =
        encode_coefficients(&small, Dims::new_1d(4), StopCondition::Lossless, &mut stream).unwrap();
    assert_eq!(stream.wtell(), info.num_bits);
    let rec = decode_coefficients(&info, &mut stream, None).unwrap();
    assert_eq!(rec.coeffs, small);
}

#[test]
fn test_truncated_input_is_data_error() {
    let coeffs: Vec<f64> = (0..100).map(|i| i as f64).collect();
    let dims = Dims::new_2d(10, 10);
    let mut stream = BitStream::new();
    let info = encode_coefficients(&coeffs, dims, StopCondition::Lossless, &mut stream).unwrap();

    let cut = info.num_bits / 3;
    let mut short = BitStream::new();
    short.parse_bitstream(&stream.get_bitstream(cut), cut).unwrap();

    let err = decode_coefficients(&info, &mut short, None).unwrap_err();
    assert!(err.is_data_error());
    match err {
        SperrError::TruncatedStream { available, required } => {
            assert_eq!(available, cut);
            assert_eq!(required, info.num_bits);
        }
        other => panic!("unexpected error {:?}", other),
    }

    // an intentional budget within what is available is normal termination
    let rec = decode_coefficients(&info, &mut short, Some(cut)).unwrap();
    assert_eq!(rec.bits_read, cut);
}
