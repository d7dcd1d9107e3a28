use proptest::prelude::*;

use wspoll_core::protocol::apply_mask;

proptest! {
    #[test]
    fn masking_twice_restores_input(data in proptest::collection::vec(any::<u8>(), 0..512), key in any::<[u8; 4]>()) {
        let mut buf = data.clone();
        apply_mask(&mut buf, key);
        apply_mask(&mut buf, key);
        prop_assert_eq!(buf, data);
    }

    #[test]
    fn mask_uses_key_byte_by_position(data in proptest::collection::vec(any::<u8>(), 1..64), key in any::<[u8; 4]>()) {
        let mut buf = data.clone();
        apply_mask(&mut buf, key);
        for (i, (m, d)) in buf.iter().zip(&data).enumerate() {
            prop_assert_eq!(*m, d ^ key[i % 4]);
        }
    }
}
