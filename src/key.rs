//! # 图片请求键（ImageKey）
//!
//! ## 设计思路
//!
//! `ImageKey` 决定“两个请求能否共用同一个解码会话 / 同一条尺寸元数据”。
//! 它是纯值类型，相等性由全部字段共同决定：
//!
//! - 来源定位符、缩放倍率、目标宽高按值比较；
//! - 占位图提供者按**身份**比较（同一个 `Rc`）；
//! - 参数表与附加信息表按内容比较，缺省与空表视为相等；
//! - 绑定配置只比较 `dimension_only` 标志，防止“仅尺寸”会话被复用来提供像素，反之亦然。
//!
//! ## 实现思路
//!
//! - 两张表统一存为 `BTreeMap`，“缺省”在构造时就折叠为空表，比较时无需特判。
//! - `Hash` 只取定位符：刻意粗粒度，冲突由 `Eq` 兜底，只影响桶分布。
//! - `with_configuration` 复制出绑定到新配置的键，原键不变。

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::codec::CodecRequest;
use crate::listener::PlaceholderProvider;

/// 解析配置。
///
/// 同一个逻辑请求可能在不同配置下解析（例如“仅尺寸”与“完整像素”）。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageConfiguration {
    /// 设备像素比，交给占位图提供者使用。
    pub device_pixel_ratio: Option<f64>,
    /// 逻辑布局尺寸（宽，高）。
    pub logical_size: Option<(f64, f64)>,
    /// 只需要尺寸/动画元数据，不解码像素。
    pub dimension_only: bool,
}

impl ImageConfiguration {
    /// 仅查询尺寸元数据的配置。
    pub fn for_dimensions() -> Self {
        Self {
            dimension_only: true,
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct ImageKey {
    locator: String,
    scale: f64,
    target_width: Option<u32>,
    target_height: Option<u32>,
    placeholder: Option<Rc<dyn PlaceholderProvider>>,
    parameters: BTreeMap<String, String>,
    extra_info: BTreeMap<String, String>,
    configuration: Option<ImageConfiguration>,
}

impl ImageKey {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            scale: 1.0,
            target_width: None,
            target_height: None,
            placeholder: None,
            parameters: BTreeMap::new(),
            extra_info: BTreeMap::new(),
            configuration: None,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_target_size(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.target_width = width;
        self.target_height = height;
        self
    }

    pub fn with_placeholder(mut self, placeholder: Rc<dyn PlaceholderProvider>) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// 整表设置解码参数；传入空迭代器等价于“没有参数”。
    pub fn with_parameters<I, K, V>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.parameters = parameters
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn with_extra_info(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_info.insert(name.into(), value.into());
        self
    }

    /// 复制出绑定到 `configuration` 的新键（copyWithConfiguration）。
    pub fn with_configuration(&self, configuration: ImageConfiguration) -> Self {
        let mut key = self.clone();
        key.configuration = Some(configuration);
        key
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn target_width(&self) -> Option<u32> {
        self.target_width
    }

    pub fn target_height(&self) -> Option<u32> {
        self.target_height
    }

    pub fn placeholder(&self) -> Option<&Rc<dyn PlaceholderProvider>> {
        self.placeholder.as_ref()
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn extra_info(&self) -> &BTreeMap<String, String> {
        &self.extra_info
    }

    pub fn configuration(&self) -> Option<&ImageConfiguration> {
        self.configuration.as_ref()
    }

    /// 未绑定配置时视为完整像素请求。
    pub fn is_dimension_only(&self) -> bool {
        self.configuration
            .as_ref()
            .map(|config| config.dimension_only)
            .unwrap_or(false)
    }

    /// 元数据缓存使用的键。
    ///
    /// 尺寸结果与像素/尺寸模式无关，统一绑定为尺寸配置，像素会话写入的记录可被尺寸查询命中。
    pub fn metadata_key(&self) -> ImageKey {
        if self.is_dimension_only() {
            self.clone()
        } else {
            self.with_configuration(ImageConfiguration::for_dimensions())
        }
    }

    pub(crate) fn codec_request(&self) -> CodecRequest {
        CodecRequest {
            locator: self.locator.clone(),
            target_width: self.target_width,
            target_height: self.target_height,
            parameters: self.parameters.clone(),
            dimension_only: self.is_dimension_only(),
        }
    }

    fn same_placeholder(&self, other: &Self) -> bool {
        match (&self.placeholder, &other.placeholder) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for ImageKey {
    fn eq(&self, other: &Self) -> bool {
        self.locator == other.locator
            && self.scale == other.scale
            && self.target_width == other.target_width
            && self.target_height == other.target_height
            && self.same_placeholder(other)
            && self.parameters == other.parameters
            && self.extra_info == other.extra_info
            && self.is_dimension_only() == other.is_dimension_only()
    }
}

// `scale` 为 NaN 的键不满足自反性；调用方负责传入有限倍率。
impl Eq for ImageKey {}

impl Hash for ImageKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.locator.hash(state);
    }
}

impl fmt::Debug for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageKey")
            .field("locator", &self.locator)
            .field("scale", &self.scale)
            .field("target_width", &self.target_width)
            .field("target_height", &self.target_height)
            .field("has_placeholder", &self.placeholder.is_some())
            .field("parameters", &self.parameters)
            .field("extra_info", &self.extra_info)
            .field("dimension_only", &self.is_dimension_only())
            .finish()
    }
}
