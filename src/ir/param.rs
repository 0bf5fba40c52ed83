//! External inputs: scalar parameters and image parameters.

use crate::buffer::Buffer;
use crate::ir::expr::{Expr, ExprKind};
use crate::ir::types::{Element, Type, Value};
use crate::utils::intern::unique_name;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static PARAM_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_id() -> u64 {
    PARAM_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub(crate) struct ParamContents {
    pub id: u64,
    pub name: String,
    pub ty: Type,
    pub value: Option<Value>,
    pub min: Expr,
    pub max: Expr,
    pub range_version: u64,
}

/// A scalar external input, bound to a value before realization.
///
/// Cloning a `Param` yields another handle to the same parameter.
#[derive(Clone)]
pub struct Param {
    pub(crate) contents: Rc<RefCell<ParamContents>>,
}

impl Param {
    pub fn new(name: &str, ty: Type) -> Self {
        Self {
            contents: Rc::new(RefCell::new(ParamContents {
                id: next_id(),
                name: name.to_string(),
                ty,
                value: None,
                min: Expr::undefined(),
                max: Expr::undefined(),
                range_version: 0,
            })),
        }
    }

    /// A parameter whose type follows the Rust type `T`.
    pub fn of<T: Element>(name: &str) -> Self {
        Self::new(name, T::TYPE)
    }

    /// A parameter with a generated name.
    pub fn anonymous(ty: Type) -> Self {
        Self::new(&unique_name("p"), ty)
    }

    pub fn id(&self) -> u64 {
        self.contents.borrow().id
    }

    pub fn name(&self) -> String {
        self.contents.borrow().name.clone()
    }

    pub fn ty(&self) -> Type {
        self.contents.borrow().ty
    }

    /// Bind a value. The value is converted to the parameter's type.
    pub fn set<T: Element>(&self, value: T) {
        let mut contents = self.contents.borrow_mut();
        let ty = contents.ty;
        contents.value = Some(ty.normalize(value.into_value()));
    }

    pub fn set_value(&self, value: Value) {
        let mut contents = self.contents.borrow_mut();
        let ty = contents.ty;
        contents.value = Some(ty.normalize(value));
    }

    pub fn value(&self) -> Option<Value> {
        self.contents.borrow().value
    }

    /// The bound value converted to `T`, if any.
    pub fn get<T: Element>(&self) -> Option<T> {
        self.value().map(T::from_value)
    }

    /// Constrain the values this parameter may take at realization time.
    ///
    /// Either bound may be undefined to leave that side open. Bounds may
    /// refer to other parameters. Violations are reported when the
    /// pipeline runs.
    pub fn set_range(&self, min: impl Into<Expr>, max: impl Into<Expr>) {
        let mut contents = self.contents.borrow_mut();
        contents.min = min.into();
        contents.max = max.into();
        contents.range_version += 1;
    }

    pub fn set_min(&self, min: impl Into<Expr>) {
        let mut contents = self.contents.borrow_mut();
        contents.min = min.into();
        contents.range_version += 1;
    }

    pub fn set_max(&self, max: impl Into<Expr>) {
        let mut contents = self.contents.borrow_mut();
        contents.max = max.into();
        contents.range_version += 1;
    }

    pub fn min(&self) -> Expr {
        self.contents.borrow().min.clone()
    }

    pub fn max(&self) -> Expr {
        self.contents.borrow().max.clone()
    }

    pub(crate) fn range_version(&self) -> u64 {
        self.contents.borrow().range_version
    }

    pub fn expr(&self) -> Expr {
        Expr::from(self)
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.contents.borrow();
        write!(f, "Param({}: {}", c.name, c.ty)?;
        if let Some(v) = c.value {
            write!(f, " = {}", v)?;
        }
        write!(f, ")")
    }
}

impl From<&Param> for Expr {
    fn from(p: &Param) -> Expr {
        let ty = p.ty();
        Expr::new(ty, ExprKind::Param(p.clone()))
    }
}

impl From<Param> for Expr {
    fn from(p: Param) -> Expr {
        Expr::from(&p)
    }
}

pub(crate) struct ImageParamContents {
    pub id: u64,
    pub name: String,
    pub ty: Type,
    pub dims: usize,
    pub buffer: Option<Arc<Buffer>>,
}

/// An external input buffer of fixed element type and dimensionality.
#[derive(Clone)]
pub struct ImageParam {
    pub(crate) contents: Rc<RefCell<ImageParamContents>>,
}

impl ImageParam {
    pub fn new(name: &str, ty: Type, dims: usize) -> Self {
        Self {
            contents: Rc::new(RefCell::new(ImageParamContents {
                id: next_id(),
                name: name.to_string(),
                ty,
                dims,
                buffer: None,
            })),
        }
    }

    pub fn id(&self) -> u64 {
        self.contents.borrow().id
    }

    pub fn name(&self) -> String {
        self.contents.borrow().name.clone()
    }

    pub fn ty(&self) -> Type {
        self.contents.borrow().ty
    }

    pub fn dimensions(&self) -> usize {
        self.contents.borrow().dims
    }

    /// Bind the buffer read by the pipeline. Its type and shape are checked
    /// when the pipeline runs.
    pub fn set(&self, buffer: Buffer) {
        self.contents.borrow_mut().buffer = Some(Arc::new(buffer));
    }

    pub fn set_shared(&self, buffer: Arc<Buffer>) {
        self.contents.borrow_mut().buffer = Some(buffer);
    }

    pub fn buffer(&self) -> Option<Arc<Buffer>> {
        self.contents.borrow().buffer.clone()
    }

    /// Read the image at the given coordinates.
    pub fn at<I, E>(&self, args: I) -> Expr
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        let args: Vec<Expr> = args.into_iter().map(Into::into).collect();
        if args.iter().any(|a| !a.defined()) {
            return Expr::undefined();
        }
        let ty = self.ty();
        Expr::new(ty, ExprKind::ImageLoad { image: self.clone(), args })
    }

    /// Extent of dimension `dim` of the bound buffer.
    pub fn extent(&self, dim: usize) -> Expr {
        Expr::new(Type::int(32), ExprKind::ImageExtent { image: self.clone(), dim, min: false })
    }

    /// Minimum coordinate of dimension `dim` of the bound buffer.
    pub fn min(&self, dim: usize) -> Expr {
        Expr::new(Type::int(32), ExprKind::ImageExtent { image: self.clone(), dim, min: true })
    }

    pub fn width(&self) -> Expr {
        self.extent(0)
    }

    pub fn height(&self) -> Expr {
        self.extent(1)
    }

    pub fn channels(&self) -> Expr {
        self.extent(2)
    }
}

impl fmt::Debug for ImageParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.contents.borrow();
        write!(f, "ImageParam({}: {} x{})", c.name, c.ty, c.dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_binding() {
        let p = Param::of::<i32>("p");
        assert!(p.value().is_none());
        p.set(300i32);
        assert_eq!(p.get::<i32>(), Some(300));

        let q = Param::new("q", Type::uint(8));
        q.set(300i32);
        assert_eq!(q.value(), Some(Value::UInt(44)));
    }

    #[test]
    fn test_param_range_version() {
        let p = Param::of::<i32>("p");
        let before = p.range_version();
        p.set_range(0, 10);
        assert!(p.range_version() > before);
        assert_eq!(p.max().as_int(), Some(10));
    }

    #[test]
    fn test_image_param_exprs() {
        let im = ImageParam::new("input", Type::float(32), 2);
        let e = im.at([Expr::from(0), Expr::from(1)]);
        assert_eq!(e.ty(), Some(Type::float(32)));
        assert!(!im.at([Expr::from(0), Expr::undefined()]).defined());
        assert_eq!(im.width().ty(), Some(Type::int(32)));
    }
}
