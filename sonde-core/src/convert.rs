//! Unit conversions shared by the unifier and reformatter.
//!
//! Every function takes an explicit decimal `precision` and rounds its result.

/// Round `value` to `precision` decimal digits.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

pub fn feet_to_meter(feet: f64, precision: u32) -> f64 {
    round_to(feet * 0.3048, precision)
}

pub fn meter_to_feet(meters: f64, precision: u32) -> f64 {
    round_to(meters * 3.28084, precision)
}

pub fn knot_to_kph(knots: f64, precision: u32) -> f64 {
    round_to(knots * 1.852, precision)
}

pub fn kph_to_knot(kph: f64, precision: u32) -> f64 {
    round_to(kph * 0.539957, precision)
}

pub fn knot_to_ms(knots: f64, precision: u32) -> f64 {
    round_to(knots * 0.514444, precision)
}

pub fn ms_to_knot(ms: f64, precision: u32) -> f64 {
    round_to(ms * 1.94384, precision)
}

pub fn kph_to_ms(kph: f64, precision: u32) -> f64 {
    round_to(kph * 0.277778, precision)
}

pub fn ms_to_kph(ms: f64, precision: u32) -> f64 {
    round_to(ms * 3.6, precision)
}

/// Degrees + decimal minutes to signed decimal degrees.
///
/// `S` and `W` hemispheres yield negative values.
pub fn gmm_to_dg(degree: f64, minute: f64, direction: char, precision: u32) -> f64 {
    let dg = round_to(degree + minute / 60.0, precision);
    if matches!(direction, 'S' | 'W') {
        -dg
    } else {
        dg
    }
}

/// Signed decimal degrees to (degree, minute, hemisphere).
pub fn dg_to_gmm(dg: f64, is_latitude: bool, precision: u32) -> (i64, f64, char) {
    let degree = dg.trunc();
    let minute = round_to((dg - degree).abs() * 60.0, precision);
    let direction = match (dg > 0.0, is_latitude) {
        (true, true) => 'N',
        (true, false) => 'E',
        (false, true) => 'S',
        (false, false) => 'W',
    };
    (degree.abs() as i64, minute, direction)
}

/// Seconds of uptime from an hour/minute/second timer.
pub fn hms_to_seconds(hour: i64, minute: i64, second: i64) -> i64 {
    hour * 3600 + minute * 60 + second
}

/// Frame number (at `framerate` frames per second) from an uptime timer.
pub fn hms_to_frame(hour: i64, minute: i64, second: i64, framerate: i64) -> i64 {
    hms_to_seconds(hour, minute, second) * framerate
}

/// Uptime timer from a frame number; `framerate` is seconds per frame.
pub fn frame_to_hms(frame: i64, framerate: i64) -> (i64, i64, i64) {
    let seconds = frame * framerate;
    (seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(1.235, 0), 1.0);
        assert_eq!(round_to(-2.5, 0), -3.0);
    }

    #[test]
    fn test_feet_to_meter() {
        assert_eq!(feet_to_meter(1000.0, 2), 304.8);
        assert_eq!(meter_to_feet(304.8, 0), 1000.0);
    }

    #[test]
    fn test_speed_conversions() {
        assert_eq!(knot_to_kph(10.0, 2), 18.52);
        assert_eq!(kph_to_ms(36.0, 1), 10.0);
        assert_eq!(ms_to_kph(10.0, 1), 36.0);
        assert_eq!(knot_to_ms(10.0, 3), 5.144);
    }

    #[test]
    fn test_gmm_to_dg_hemispheres() {
        assert_eq!(gmm_to_dg(50.0, 30.0, 'N', 5), 50.5);
        assert_eq!(gmm_to_dg(50.0, 30.0, 'S', 5), -50.5);
        assert_eq!(gmm_to_dg(10.0, 0.0, 'W', 5), -10.0);
    }

    #[test]
    fn test_dg_to_gmm() {
        assert_eq!(dg_to_gmm(-50.5, true, 2), (50, 30.0, 'S'));
        assert_eq!(dg_to_gmm(10.25, false, 2), (10, 15.0, 'E'));
    }

    #[test]
    fn test_frame_hms() {
        assert_eq!(hms_to_frame(1, 2, 3, 1), 3723);
        assert_eq!(frame_to_hms(3723, 1), (1, 2, 3));
    }
}
