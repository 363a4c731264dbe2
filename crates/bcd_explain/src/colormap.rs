//! JET colormap.

/// Map an 8-bit intensity to RGB on the JET scale (blue → cyan → yellow → red).
pub fn jet(value: u8) -> [u8; 3] {
    let v = f32::from(value) / 255.0;
    let channel = |offset: f32| {
        let c = (1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0);
        (c * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        assert_eq!(jet(0), [0, 0, 128]);
        assert_eq!(jet(255), [128, 0, 0]);
    }

    #[test]
    fn test_midpoint_is_green() {
        let [r, g, b] = jet(128);
        assert_eq!(g, 255);
        assert!(r > 100 && b > 100);
    }

    #[test]
    fn test_blue_dominates_low_values() {
        for value in 0..64u8 {
            let [r, _, b] = jet(value);
            assert!(b >= r);
        }
    }
}
