pub fn clamp<T: PartialOrd>(x: T, a: T, b: T) -> T {
    if x < a {
        a
    }
    else if x > b {
        b
    }
    else {
        x
    }
}

/**
 * Linearly interpolates between x and y. Where a = 0, x is returned, and
 * where a = 1, y is returned. If a < 0 or a > 1, this function will
 * extrapolate.
 */
pub fn lerp(x: f32, y: f32, a: f32) -> f32 {
    x + a * (y - x)
}

/**
 * Determines whether a number is zero, within a small epsilon.
 */
pub fn is_nearly_zero(x: f32) -> bool {
    f32::abs(x) < std::f32::EPSILON
}

/// Rounds a non-negative ratio up to the nearest integer, never returning less than 1.
pub fn ceil_to_count(x: f32) -> u32 {
    if x.is_finite() && x > 1.0 {
        x.ceil() as u32
    }
    else {
        1
    }
}
