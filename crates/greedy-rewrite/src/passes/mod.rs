//! Rewrite patterns and the module passes that apply them.

mod canonicalize_ext;
pub mod constant_slice_fold;
mod copy_to_kernel;
pub mod tensor_canonicalization;

pub use canonicalize_ext::{
    get_canonicalization_ext_patterns, populate_canonicalize_ext_patterns,
    reassociation_for_folding_unit_dims, CanonicalizeExtOptions, CanonicalizeExtPass,
    RankReducedExtractSliceCollapseShape,
};
pub use constant_slice_fold::{
    fold_always, populate_fold_constant_extract_slice_patterns, ControlFn,
    FoldConstantExtractSlice,
};
pub use copy_to_kernel::{
    lower_copies_to_kernels, CopyToKernelOptions, MemrefCopyToKernel, MemrefCopyToKernelPass,
    COPY_KERNEL_NAME, READONLY_OPERAND_NUM_ATTR,
};
pub use tensor_canonicalization::{
    ComposeCollapseShapes, ComposeExtractSlices, EliminateIdentityCollapseShape,
    EliminateIdentityExtractSlice, FoldCollapseOfExpand, FoldExpandOfCollapse,
};
