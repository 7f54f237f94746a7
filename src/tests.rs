use regex::Regex;

use crate::prelude::*;

/// Compare rendered indexing maps, ignoring indentation, line breaks and padding inside parentheses
pub(crate) fn assert_indexing_eq(actual: &str, expected: &str) {
    let whitespace = Regex::new(r"\s+").unwrap();
    let padding = Regex::new(r"\(\s+|\s+\)").unwrap();
    let normalize = |s: &str| {
        let collapsed = whitespace.replace_all(s.trim(), " ");
        padding
            .replace_all(&collapsed, |caps: &regex::Captures| caps[0].trim().to_string())
            .to_string()
    };
    assert_eq!(
        normalize(actual),
        normalize(expected),
        "Indexing maps don't match:\n{actual}"
    );
}

fn launch_map(map: &IndexingMap, arena: &ExprArena) -> String {
    map.format(arena, &IndexingMapPrinter::launch())
}

#[test]
fn test_copy_and_bitcast_keep_the_map() {
    let mut fusion = Fusion::new("fused");
    let cx = fusion.fused_mut();
    let p = cx.parameter("p0", Shape::new(PrimitiveType::F32, &[16, 32]));
    let copy = cx.copy("copy", p);
    let bitcast = cx.bitcast("bitcast", copy, Shape::new(PrimitiveType::F32, &[16, 32]));
    cx.set_root(bitcast);

    let mut arena = ExprArena::new();
    let loop_fusion = LoopFusion::new(&fusion, &DeviceInfo::default()).unwrap();
    let output = loop_fusion
        .compute_thread_id_to_output_indexing(0, &mut arena)
        .unwrap();
    let input = loop_fusion
        .compute_thread_id_to_parameter_indexing(0, &mut arena)
        .unwrap();
    assert_eq!(input, vec![output.clone()]);
    assert_indexing_eq(
        &launch_map(&output, &arena),
        "(th_x, th_y, th_z, bl_x, bl_y, bl_z)[chunk_id, unroll_id]
           -> (bl_x * 4 + th_x floordiv 32, th_x mod 32)
         domain:
         th_x in [0, 127]
         th_y in [0, 0]
         th_z in [0, 0]
         bl_x in [0, 3]
         bl_y in [0, 0]
         bl_z in [0, 0]
         chunk_id in [0, 0]
         unroll_id in [0, 0]",
    );
}

#[test]
fn test_bitcast_to_another_shape_reshapes() {
    let mut fusion = Fusion::new("fused");
    let cx = fusion.fused_mut();
    let p = cx.parameter("p0", Shape::new(PrimitiveType::F32, &[8, 4]));
    let bitcast = cx.bitcast("bitcast", p, Shape::new(PrimitiveType::S32, &[32]));
    cx.set_root(bitcast);

    let mut arena = ExprArena::new();
    let loop_fusion = LoopFusion::new(&fusion, &DeviceInfo::default()).unwrap();
    let input = loop_fusion
        .compute_thread_id_to_input_indexing(0, 0, &mut arena)
        .unwrap();
    assert_indexing_eq(
        &launch_map(&input, &arena),
        "(th_x, th_y, th_z, bl_x, bl_y, bl_z)[chunk_id, unroll_id]
           -> (th_x floordiv 4, th_x mod 4)
         domain:
         th_x in [0, 31]
         th_y in [0, 0]
         th_z in [0, 0]
         bl_x in [0, 0]
         bl_y in [0, 0]
         bl_z in [0, 0]
         chunk_id in [0, 0]
         unroll_id in [0, 0]",
    );
    let module = loop_fusion.create_module("fused", &mut arena).unwrap();
    assert_eq!(module.count("arith.bitcast"), 1);
}

#[test]
fn test_result_lists_may_span_lines() {
    assert_indexing_eq(
        "(d0) -> ((d0 floordiv 4) mod 2, d0 mod 4)",
        "(d0) -> (
           (d0 floordiv 4) mod 2,
           d0 mod 4
         )",
    );
}
