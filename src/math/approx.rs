//! Fast math approximations
//!
//! Polynomial sine/cosine, the Quake inverse square root, and an
//! IEEE-754 exponent-extraction log2. The pipeline entry points at the
//! bottom route through these when the `fast-math` feature is enabled and
//! through std math otherwise; the approximations themselves are always
//! available. Accuracy class is ~1e-3 relative error.

use std::f32::consts::PI;

/// Fast inverse square root from "Quake III Arena"
/// See http://en.wikipedia.org/wiki/Fast_inverse_square_root
pub fn fast_inv_sqrt(x: f32) -> f32 {
    let x2 = x * 0.5;
    let i = 0x5f37_59df - (x.to_bits() >> 1);
    let y = f32::from_bits(i);
    y * (1.5 - x2 * y * y)
}

/// Fast and accurate sine approximation
/// See http://lab.polygonal.de/?p=205
pub fn fast_sin(x: f32) -> f32 {
    // Always wrap input angle to [-PI .. PI]
    let x = if x < -PI {
        (x - PI) % (PI * 2.0) + PI
    } else if x > PI {
        (x + PI) % (PI * 2.0) - PI
    } else {
        x
    };

    let y = if x < 0.0 {
        1.273_239_5 * x + 0.405_284_73 * x * x
    } else {
        1.273_239_5 * x - 0.405_284_73 * x * x
    };

    if y < 0.0 {
        0.225 * (y * (-y) - y) + y
    } else {
        0.225 * (y * y - y) + y
    }
}

pub fn fast_cos(x: f32) -> f32 {
    fast_sin(x + PI * 0.5)
}

/// See http://stackoverflow.com/questions/9411823/fast-log2float-x-implementation-c
pub fn fast_log2(x: f32) -> f32 {
    let bits = x.to_bits();
    let lg2 = ((bits >> 23) & 255) as i32 - 128;

    let mantissa_bits = (bits & !(255 << 23)) + (127 << 23);
    let m = f32::from_bits(mantissa_bits);

    let m = ((-1.0 / 3.0) * m + 2.0) * m - 2.0 / 3.0;

    m + lg2 as f32
}

/// Integer floor(log2(x)) via exponent extraction.
pub fn fast_int_log2(x: f32) -> i32 {
    let exp = ((x.to_bits() >> 23) & 0xff) as i32;
    exp - 127
}

// --- pipeline entry points --- //

#[cfg(feature = "fast-math")]
pub fn sin(x: f32) -> f32 {
    fast_sin(x)
}

#[cfg(not(feature = "fast-math"))]
pub fn sin(x: f32) -> f32 {
    x.sin()
}

#[cfg(feature = "fast-math")]
pub fn cos(x: f32) -> f32 {
    fast_cos(x)
}

#[cfg(not(feature = "fast-math"))]
pub fn cos(x: f32) -> f32 {
    x.cos()
}

#[cfg(feature = "fast-math")]
pub fn inv_sqrt(x: f32) -> f32 {
    fast_inv_sqrt(x)
}

#[cfg(not(feature = "fast-math"))]
pub fn inv_sqrt(x: f32) -> f32 {
    1.0 / x.sqrt()
}

/// Integer floor(log2(x)) for positive finite x; 0 otherwise.
pub fn int_log2(x: f32) -> i32 {
    if !(x > 0.0) || !x.is_finite() {
        return 0;
    }
    #[cfg(feature = "fast-math")]
    {
        fast_int_log2(x)
    }
    #[cfg(not(feature = "fast-math"))]
    {
        x.log2().floor() as i32
    }
}
