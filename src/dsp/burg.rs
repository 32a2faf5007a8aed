//! Burg method autoregressive model, used to synthesize missing packets.
//!
//! The estimator uses forward and backward prediction errors at the same
//! time, which keeps it stable on the short training windows we feed it
//! (a couple hundred samples).  [`crate::sound::plc::ChannelPlc`] trains a
//! model over its packet history and rolls it forward to fill a gap.

/// Burg AR coefficient estimator plus forward extrapolation.
///
/// The struct only exists to hold scratch storage so repeated train calls
/// don't allocate in the audio callback.
pub struct BurgAlgorithm {
    ak: Vec<f64>,
    f: Vec<f64>,
    b: Vec<f64>,
}

impl BurgAlgorithm {
    pub fn new() -> BurgAlgorithm {
        BurgAlgorithm {
            ak: vec![],
            f: vec![],
            b: vec![],
        }
    }

    /// Fit coeffs to the signal x.  The model order is coeffs.len() which the
    /// caller sizes to the training window length minus two.
    pub fn train(&mut self, coeffs: &mut [f64], x: &[f32]) -> () {
        let n = x.len() - 1;
        let m = coeffs.len();

        self.ak.clear();
        self.ak.resize(m + 1, 0.0);
        self.ak[0] = 1.0;

        self.f.clear();
        self.f.extend(x.iter().map(|v| *v as f64));
        self.b.clear();
        self.b.extend_from_slice(&self.f);

        // initial error energy.  2.00001 instead of 2.0 adds a little damping
        // that the estimator needs on near-periodic input.
        let mut dk: f64 = 0.0;
        for j in 0..=n {
            dk += 2.00001 * self.f[j] * self.f[j];
        }
        dk -= self.f[0] * self.f[0] + self.b[n] * self.b[n];

        for k in 0..m {
            let mut mu: f64 = 0.0;
            for i in 0..=(n - k - 1) {
                mu += self.f[i + k + 1] * self.b[i];
            }

            dk = dk.max(1e-7); // keep the division from blowing up
            mu *= -2.0 / dk;

            for i in 0..=((k + 1) / 2) {
                let t1 = self.ak[i] + mu * self.ak[k + 1 - i];
                let t2 = self.ak[k + 1 - i] + mu * self.ak[i];
                self.ak[i] = t1;
                self.ak[k + 1 - i] = t2;
            }

            for i in 0..=(n - k - 1) {
                let t1 = self.f[i + k + 1] + mu * self.b[i];
                let t2 = self.b[i] + mu * self.f[i + k + 1];
                self.f[i + k + 1] = t1;
                self.b[i] = t2;
            }

            dk = (1.0 - mu * mu) * dk
                - self.f[k + 1] * self.f[k + 1]
                - self.b[n - k - 1] * self.b[n - k - 1];
        }
        coeffs.copy_from_slice(&self.ak[1..]);
    }

    /// Roll the model forward.  tail comes in holding the training signal and
    /// grows by count extrapolated samples.
    pub fn predict(&self, coeffs: &[f64], tail: &mut Vec<f32>, count: usize) -> () {
        let m = coeffs.len();
        let start = tail.len();
        tail.resize(start + count, 0.0);
        for i in start..tail.len() {
            let mut v: f64 = 0.0;
            for j in 0..m {
                v -= coeffs[j] * tail[i - 1 - j] as f64;
            }
            tail[i] = v as f32;
        }
    }
}

#[cfg(test)]
mod test_burg {
    use super::*;

    fn sine(len: usize, w: f64, amp: f32) -> Vec<f32> {
        (0..len).map(|i| amp * (w * i as f64).sin() as f32).collect()
    }

    #[test]
    fn predicts_a_sinusoid() {
        // a pure tone should extrapolate with small error
        let train: Vec<f32> = (0..192)
            .map(|i| 0.5 * f64::sin(0.2 * i as f64) as f32)
            .collect();
        let mut coeffs = vec![0.0; train.len() - 2];
        let mut ba = BurgAlgorithm::new();
        ba.train(&mut coeffs, &train);

        let mut tail = train.clone();
        ba.predict(&coeffs, &mut tail, 64);
        for i in 0..64 {
            let truth = 0.5 * f64::sin(0.2 * (192 + i) as f64) as f32;
            assert!((tail[192 + i] - truth).abs() < 0.05, "sample {} off", i);
        }
    }

    #[test]
    fn survives_silence() {
        // all-zero training must not produce NaN
        let train = vec![0.0f32; 128];
        let mut coeffs = vec![0.0; train.len() - 2];
        let mut ba = BurgAlgorithm::new();
        ba.train(&mut coeffs, &train);
        let mut tail = train.clone();
        ba.predict(&coeffs, &mut tail, 32);
        for v in &tail {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn scratch_reuse() {
        // training twice with the same input gives the same coefficients
        let train = sine(192, 0.03, 0.4);
        let mut c1 = vec![0.0; 190];
        let mut c2 = vec![0.0; 190];
        let mut ba = BurgAlgorithm::new();
        ba.train(&mut c1, &train);
        ba.train(&mut c2, &train);
        assert_eq!(c1, c2);
    }
}
