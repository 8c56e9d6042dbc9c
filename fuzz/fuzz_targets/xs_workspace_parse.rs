#![no_main]

use libfuzzer_sys::fuzz_target;
use xs_core::traits::LogDensityModel;
use xs_model::{BinnedModel, Workspace};

fuzz_target!(|data: &[u8]| {
    // Keep inputs small; the parser is the target, not the allocator.
    if data.len() > 1 << 16 {
        return;
    }
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(ws) = Workspace::from_json(text) else {
        return;
    };
    let Ok(model) = BinnedModel::from_workspace(&ws) else {
        return;
    };

    let compiled = model.compile();
    let init = compiled.parameter_init();
    let _ = compiled.twice_nll(&init);
    let _ = compiled.grad_twice_nll(&init);
});
