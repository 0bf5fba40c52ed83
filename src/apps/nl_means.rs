//! Non-local means denoising.
//!
//! Each output pixel is a weighted mean of the pixels in a square search
//! area around it. A candidate's weight falls off with the squared
//! difference between the patch around it and the patch around the
//! output pixel:
//!
//! ```text
//! w(x, y, dx, dy) = exp(-|patch(x, y) - patch(x + dx, y + dy)|^2 / (sigma * patch_size)^2)
//! ```
//!
//! The same algorithm is built with two schedules so the `process`
//! harness can time them against each other.

use crate::buffer::Buffer;
use crate::func::{sum, Func};
use crate::ir::expr::{cast, clamp, exp, pow, select, Expr};
use crate::ir::param::{ImageParam, Param};
use crate::ir::types::Type;
use crate::ir::var::{RDom, Range, Var};
use crate::utils::errors::FlowResult;
use log::debug;
use std::sync::Arc;

/// Which schedule to attach to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleStyle {
    /// Hand-written: tiled, parallel output over materialized sums
    Manual,
    /// The kind of schedule an automatic scheduler proposes: row strips in
    /// parallel, the alpha-extended input computed once
    Auto,
}

/// The denoising pipeline and the inputs it is declared over.
pub struct NlMeans {
    pub input: ImageParam,
    pub patch_size: Param,
    pub search_area: Param,
    pub sigma: Param,
    pub output: Func,
}

fn args<const N: usize>(args: [Expr; N]) -> [Expr; N] {
    args
}

impl NlMeans {
    pub fn new(style: ScheduleStyle) -> FlowResult<Self> {
        let (x, y, c) = (Var::new("x"), Var::new("y"), Var::new("c"));
        let (dx, dy) = (Var::new("dx"), Var::new("dy"));

        let input = ImageParam::new("input", Type::float(32), 3);
        let patch_size = Param::new("patch_size", Type::int(32));
        let search_area = Param::new("search_area", Type::int(32));
        let sigma = Param::new("sigma", Type::float(32));

        let patch_f = cast(Type::float(32), Expr::from(&patch_size) * &patch_size);
        let inv_sigma_sq = Expr::from(-1.0f32) / (Expr::from(&sigma) * &sigma * patch_f);

        let clamped = Func::new("clamped");
        clamped.define(
            &[x, y, c],
            input.at(args([
                clamp(x, 0, input.width() - 1),
                clamp(y, 0, input.height() - 1),
                c.into(),
            ])),
        )?;

        // Squared differences, summed across colour channels.
        let dc = Func::new("dc");
        let diff = clamped.call([x, y, c]) - clamped.call(args([x + dx, y + dy, c.into()]));
        dc.define(&[x, y, dx, dy, c], pow(diff, 2.0f32))?;
        let channels = RDom::named("channels", Range::new(0, 3));
        let d = Func::new("d");
        d.define(&[x, y, dx, dy], sum(dc.call(args([x.into(), y.into(), dx.into(), dy.into(), channels.x().into()])))?)?;

        // Patch differences are box blurs of the difference images.
        let patch = RDom::named("patch", Range::new(-(Expr::from(&patch_size) / 2), &patch_size));
        let blur_d_y = Func::new("blur_d_y");
        blur_d_y.define(&[x, y, dx, dy], sum(d.call(args([x.into(), y + patch.x(), dx.into(), dy.into()])))?)?;
        let blur_d = Func::new("blur_d");
        blur_d.define(&[x, y, dx, dy], sum(blur_d_y.call(args([x + patch.x(), y.into(), dx.into(), dy.into()])))?)?;

        let w = Func::new("w");
        w.define(&[x, y, dx, dy], exp(blur_d.call([x, y, dx, dy]) * inv_sigma_sq))?;

        // The input with an alpha channel of ones, so that channel 3 of
        // the weighted sum is the sum of the weights.
        let alpha = Func::new("clamped_with_alpha");
        let cc = Expr::from(c);
        alpha.define(
            &[x, y, c],
            select(
                cc.clone().equal(0),
                clamped.call(args([x.into(), y.into(), 0.into()])),
                select(
                    cc.clone().equal(1),
                    clamped.call(args([x.into(), y.into(), 1.into()])),
                    select(cc.equal(2), clamped.call(args([x.into(), y.into(), 2.into()])), 1.0f32),
                ),
            ),
        )?;

        let half = -(Expr::from(&search_area) / 2);
        let s = RDom::named("s", Range::new(half.clone(), &search_area) * Range::new(half, &search_area));
        let weighted = Func::new("non_local_means_sum");
        weighted.define(&[x, y, c], 0.0f32)?;
        weighted.at([x, y, c]).add_assign(
            w.call(args([x.into(), y.into(), s.x().into(), s.y().into()]))
                * alpha.call(args([x + s.x(), y + s.y(), c.into()])),
        )?;

        let output = Func::new("non_local_means");
        output.define(
            &[x, y, c],
            clamp(weighted.call([x, y, c]) / weighted.call(args([x.into(), y.into(), 3.into()])), 0.0f32, 1.0f32),
        )?;

        weighted.root();
        match style {
            ScheduleStyle::Manual => {
                let (xi, yi) = (Var::new("xi"), Var::new("yi"));
                output.tile(x, y, xi, yi, 16, 16).parallel(y);
            }
            ScheduleStyle::Auto => {
                let (yo, yi) = (Var::new("yo"), Var::new("yi"));
                alpha.root();
                output.split(y, yo, yi, 8).parallel(yo);
            }
        }
        debug!("built non-local means with the {:?} schedule", style);

        Ok(Self { input, patch_size, search_area, sigma, output })
    }

    /// Denoise `input` (width x height x 3) into `output`.
    pub fn run(
        &self,
        input: Arc<Buffer>,
        patch_size: i32,
        search_area: i32,
        sigma: f32,
        output: &mut Buffer,
    ) -> FlowResult<()> {
        self.input.set_shared(input);
        self.patch_size.set(patch_size);
        self.search_area.set(search_area);
        self.sigma.set(sigma);
        self.output.realize_into(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy(width: usize, height: usize) -> Arc<Buffer> {
        let data: Vec<f32> = (0..width * height * 3).map(|i| ((i * 37) % 11) as f32 / 10.0).collect();
        Arc::new(Buffer::from_vec(data, &[width, height, 3]).unwrap())
    }

    #[test]
    fn test_schedules_agree() {
        let input = noisy(6, 5);
        let mut manual_out = Buffer::new(Type::float(32), &[6, 5, 3]);
        let mut auto_out = Buffer::new(Type::float(32), &[6, 5, 3]);
        NlMeans::new(ScheduleStyle::Manual).unwrap().run(input.clone(), 3, 3, 0.12, &mut manual_out).unwrap();
        NlMeans::new(ScheduleStyle::Auto).unwrap().run(input, 3, 3, 0.12, &mut auto_out).unwrap();
        for (a, b) in manual_out.to_vec::<f32>().iter().zip(auto_out.to_vec::<f32>()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_flat_image_is_unchanged() {
        let input = Arc::new(Buffer::from_vec(vec![0.25f32; 4 * 4 * 3], &[4, 4, 3]).unwrap());
        let mut out = Buffer::new(Type::float(32), &[4, 4, 3]);
        NlMeans::new(ScheduleStyle::Manual).unwrap().run(input, 3, 3, 0.12, &mut out).unwrap();
        assert!(out.to_vec::<f32>().iter().all(|v| (v - 0.25).abs() < 1e-5));
    }
}
