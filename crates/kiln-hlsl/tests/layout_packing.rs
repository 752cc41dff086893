use kiln_hlsl::layout::ConstantBufferWriter;
use kiln_hlsl::types::{HlslType, ScalarType};
use kiln_hlsl::ConstantBufferLayout;
use proptest::prelude::*;

fn scalar() -> impl Strategy<Value = ScalarType> {
    prop_oneof![
        Just(ScalarType::Bool),
        Just(ScalarType::Int),
        Just(ScalarType::UInt),
        Just(ScalarType::Float),
        Just(ScalarType::Double),
    ]
}

fn field_type() -> impl Strategy<Value = HlslType> {
    prop_oneof![
        4 => scalar().prop_map(HlslType::Scalar),
        4 => (scalar(), 2u8..=4).prop_map(|(s, n)| HlslType::Vector(s, n)),
        1 => (prop_oneof![Just(ScalarType::Float), Just(ScalarType::Int)], 1u8..=4, 1u8..=4)
            .prop_map(|(scalar, rows, cols)| HlslType::Matrix { scalar, rows, cols }),
        1 => (scalar(), 1u32..=4).prop_map(|(s, len)| HlslType::Array {
            element: Box::new(HlslType::Scalar(s)),
            len: Some(len),
        }),
    ]
}

fn build(types: &[HlslType]) -> ConstantBufferLayout {
    ConstantBufferLayout::build(
        types
            .iter()
            .enumerate()
            .map(|(i, ty)| (format!("f{i}"), ty.clone())),
        |_| None,
    )
}

proptest! {
    #[test]
    fn narrow_fields_never_straddle_a_register(types in prop::collection::vec(field_type(), 0..24)) {
        let layout = build(&types);
        for field in layout.fields() {
            match field.ty {
                HlslType::Scalar(_) | HlslType::Vector(..) if field.size <= 16 => {
                    prop_assert_eq!(
                        field.offset / 16,
                        (field.offset + field.size - 1) / 16,
                        "{} straddles a register", field.name
                    );
                }
                _ => prop_assert_eq!(field.offset % 16, 0, "{} is not register aligned", field.name),
            }
        }
    }

    #[test]
    fn fields_are_ordered_and_disjoint(types in prop::collection::vec(field_type(), 1..24)) {
        let layout = build(&types);
        let fields = layout.fields();
        for pair in fields.windows(2) {
            prop_assert!(pair[0].offset + pair[0].size <= pair[1].offset);
        }
        let last = &fields[fields.len() - 1];
        prop_assert_eq!(layout.size(), last.offset + last.size);
        prop_assert_eq!(layout.register_size() % 16, 0);
    }

    #[test]
    fn layout_is_deterministic(types in prop::collection::vec(field_type(), 0..24)) {
        prop_assert_eq!(build(&types), build(&types));
    }

    #[test]
    fn writer_image_matches_the_layout_size(types in prop::collection::vec(field_type(), 0..12)) {
        let layout = build(&types);
        let writer = ConstantBufferWriter::new(&layout);
        prop_assert_eq!(writer.as_bytes().len(), layout.size() as usize);
        let mut destination = vec![0u8; layout.register_size() as usize];
        prop_assert_eq!(writer.load_into(&mut destination), Ok(layout.size() as usize));
    }
}

#[test]
fn empty_layout_has_no_size() {
    let layout = build(&[]);
    assert!(layout.is_empty());
    assert_eq!(layout.size(), 0);
    assert_eq!(layout.register_size(), 0);
}
