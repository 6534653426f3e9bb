use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cam_aware_loss::{
    CameraAwareLoss, Features, LabelRegistry, LossConfig, LossGradients, MemoryBank,
    NegativeSampling,
};

fn main() -> cam_aware_loss::Result<()> {
    // Synthetic set: 12 identities seen by 3 cameras, one proxy per (identity, camera).
    let mut rng = StdRng::seed_from_u64(0);
    let (identities, cameras, dim) = (12_usize, 3_usize, 16_usize);

    let mut proxies = Vec::with_capacity(identities * cameras);
    for _ in 0..identities * cameras {
        let row: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        proxies.push(row);
    }
    let memory = MemoryBank::from_rows(&proxies)?;

    let mut records = Vec::new();
    let mut names = Vec::new();
    for id in 0..identities {
        for cam in 0..cameras {
            let proxy = id * cameras + cam;
            for shot in 0..4 {
                records.push((id as i64, cam as i64, proxy));
                names.push(format!("{id:04}_s{shot}_{cam}"));
            }
        }
    }
    let registry = LabelRegistry::from_records(&records);

    // Mini-batch: every 7th sample, with features jittered around their proxy.
    let picked: Vec<usize> = (0..records.len()).step_by(7).collect();
    let mut flat = Vec::with_capacity(picked.len() * dim);
    for &s in &picked {
        let proxy = &proxies[records[s].2];
        flat.extend(proxy.iter().map(|v| *v + rng.gen_range(-0.1_f32..0.1)));
    }
    let features = Features::from_flat(flat, dim)?;
    let raw: Vec<&str> = picked.iter().map(|&s| names[s].as_str()).collect();
    let proxy_labels: Vec<usize> = picked.iter().map(|&s| records[s].2).collect();
    let cluster_labels: Vec<i64> = picked.iter().map(|&s| records[s].0).collect();
    let camera_ids = cam_aware_loss::parse_camera_ids(&raw)?;

    let mut loss = CameraAwareLoss::new_with_seed(
        LossConfig {
            k: 8,
            negatives: NegativeSampling {
                reduce: true,
                cap: 20,
            },
            ..LossConfig::default()
        },
        0,
    )?;

    let mut grads = LossGradients::for_inputs(&features, &memory);
    let intra = loss.intra_backward(&features, &raw, &proxy_labels, &memory, &mut grads)?;
    let intra_grad_norm: f32 = grads.d_features().iter().map(|g| g * g).sum::<f32>().sqrt();

    let inter = loss.inter_backward(
        &features,
        &camera_ids,
        &cluster_labels,
        &registry,
        &memory,
        &mut grads,
    )?;
    let inter_grad_norm: f32 = grads.d_features().iter().map(|g| g * g).sum::<f32>().sqrt();

    println!("batch={} intra={intra:.4} (|grad|={intra_grad_norm:.4})", features.len());
    println!("inter={inter:.4} (|grad|={inter_grad_norm:.4})");
    Ok(())
}
