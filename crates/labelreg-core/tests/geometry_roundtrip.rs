use labelreg_core::ImageGeometry;
use nalgebra::Matrix3;
use proptest::prelude::*;

fn rotation(ax: f64, ay: f64, az: f64) -> Matrix3<f64> {
    let (sx, cx) = ax.sin_cos();
    let (sy, cy) = ay.sin_cos();
    let (sz, cz) = az.sin_cos();

    let rx = Matrix3::new(1.0, 0.0, 0.0, 0.0, cx, -sx, 0.0, sx, cx);
    let ry = Matrix3::new(cy, 0.0, sy, 0.0, 1.0, 0.0, -sy, 0.0, cy);
    let rz = Matrix3::new(cz, -sz, 0.0, sz, cz, 0.0, 0.0, 0.0, 1.0);
    rx * ry * rz
}

proptest! {
    #[test]
    fn test_physical_index_roundtrip(
        ox in -100.0f64..100.0, oy in -100.0f64..100.0, oz in -100.0f64..100.0,
        sx in 0.1f64..5.0, sy in 0.1f64..5.0, sz in 0.1f64..5.0,
        ax in -3.14f64..3.14, ay in -3.14f64..3.14, az in -3.14f64..3.14,
        px in -50.0f64..50.0, py in -50.0f64..50.0, pz in -50.0f64..50.0
    ) {
        let geometry = ImageGeometry::new([ox, oy, oz], [sx, sy, sz], rotation(ax, ay, az)).unwrap();
        let point = [px, py, pz];

        let index = geometry.physical_to_index(point).unwrap();
        let recovered = geometry.index_to_physical(index);

        for axis in 0..3 {
            prop_assert!((point[axis] - recovered[axis]).abs() < 1e-6,
                "axis {} mismatch: {} vs {}", axis, point[axis], recovered[axis]);
        }
    }
}
